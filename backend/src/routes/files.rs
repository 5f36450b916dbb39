use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::files::UploadedFile;
use crate::models::NewFileReference;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct FilePathQuery {
    pub path: String,
}

#[derive(Serialize)]
pub struct FileUrlResponse {
    pub path: String,
    pub url: String,
}

#[derive(Serialize)]
pub struct DeleteFileResponse {
    pub success: bool,
    pub path: String,
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadedFile>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut message_id: Option<Uuid> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(|n| n.to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("message_id") => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    let parsed = Uuid::parse_str(value.trim())
                        .map_err(|_| AppError::bad_request("message_id must be a valid UUID"))?;
                    message_id = Some(parsed);
                }
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    let file_name = file_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("filename is required"))?;
    let mime_type = resolve_mime(content_type, &file_name);

    let uploaded = state
        .files
        .try_upload(file_bytes, &file_name, &mime_type, user.id)
        .await
        .map_err(|err| {
            error!(user_id = %user.id, %file_name, error = %err, "file upload rejected");
            AppError::from(err)
        })?;

    if let Some(message_id) = message_id {
        let reference = state
            .history
            .attach_file(NewFileReference {
                id: Uuid::new_v4(),
                message_id,
                file_name: uploaded.file_name.clone(),
                file_path: uploaded.file_path.clone(),
                file_size: uploaded.file_size as i64,
                mime_type: uploaded.mime_type.clone(),
            })
            .await;
        if reference.is_some() {
            info!(%message_id, file_path = %uploaded.file_path, "attached file to message");
        }
    }

    Ok((StatusCode::CREATED, Json(uploaded)))
}

pub async fn file_url(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<FilePathQuery>,
) -> AppResult<Json<FileUrlResponse>> {
    let path = owned_path(&user, query.path)?;
    Ok(Json(FileUrlResponse {
        url: state.files.public_url(&path),
        path,
    }))
}

pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<FilePathQuery>,
) -> AppResult<Json<DeleteFileResponse>> {
    let path = owned_path(&user, query.path)?;
    if !state.files.delete(&path).await {
        return Err(AppError::new(
            StatusCode::BAD_GATEWAY,
            "failed to delete file",
        ));
    }
    Ok(Json(DeleteFileResponse {
        success: true,
        path,
    }))
}

/// Files live under `<user_id>/`; anything else is reported as missing.
fn owned_path(user: &AuthenticatedUser, path: String) -> AppResult<String> {
    let prefix = format!("{}/", user.id);
    let owned = path.starts_with(&prefix)
        && path.len() > prefix.len()
        && !path.split('/').any(|segment| segment == "..");
    if owned {
        Ok(path)
    } else {
        Err(AppError::not_found())
    }
}

fn resolve_mime(declared: Option<String>, file_name: &str) -> String {
    match declared {
        Some(mime) if !mime.is_empty() && mime != "application/octet-stream" => mime,
        _ => mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}
