use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::storage::ObjectStorage;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("file type not allowed: {0}")]
    TypeNotAllowed(String),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub file_name: String,
    pub file_path: String,
    pub file_size: usize,
    pub mime_type: String,
    pub public_url: String,
}

/// Uploads chat attachments to the bucket after checking size and type.
#[derive(Clone)]
pub struct FileStore {
    storage: Arc<dyn ObjectStorage>,
    public_base: String,
    max_bytes: usize,
    allowed_types: Arc<[String]>,
}

impl FileStore {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        public_base: impl Into<String>,
        max_bytes: usize,
        allowed_types: Vec<String>,
    ) -> Self {
        Self {
            storage,
            public_base: public_base.into().trim_end_matches('/').to_string(),
            max_bytes,
            allowed_types: allowed_types.into(),
        }
    }

    pub fn from_config(config: &AppConfig, storage: Arc<dyn ObjectStorage>) -> Self {
        Self::new(
            storage,
            format!(
                "{}/storage/v1/object/public/{}",
                config.supabase_url, config.storage_bucket
            ),
            config.max_upload_bytes,
            config.allowed_file_types.clone(),
        )
    }

    pub fn validate(&self, size: usize, mime_type: &str) -> Result<(), FileStoreError> {
        if size > self.max_bytes {
            return Err(FileStoreError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        if !self.allowed_types.iter().any(|allowed| allowed == mime_type) {
            return Err(FileStoreError::TypeNotAllowed(mime_type.to_string()));
        }
        Ok(())
    }

    pub async fn try_upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
        user_id: Uuid,
    ) -> Result<UploadedFile, FileStoreError> {
        let file_size = bytes.len();
        self.validate(file_size, mime_type)?;

        let file_path = storage_path(user_id, file_name, Utc::now(), &random_suffix());
        self.storage
            .put_object(&file_path, bytes, mime_type)
            .await?;

        tracing::info!(%user_id, %file_path, file_size, %mime_type, "uploaded file");

        Ok(UploadedFile {
            file_name: file_name.to_string(),
            public_url: self.public_url(&file_path),
            file_path,
            file_size,
            mime_type: mime_type.to_string(),
        })
    }

    /// Like [`FileStore::try_upload`], but failures are logged and yield `None`.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
        user_id: Uuid,
    ) -> Option<UploadedFile> {
        match self.try_upload(bytes, file_name, mime_type, user_id).await {
            Ok(uploaded) => Some(uploaded),
            Err(err) => {
                tracing::warn!(%user_id, %file_name, error = %err, "file upload failed");
                None
            }
        }
    }

    pub async fn delete(&self, file_path: &str) -> bool {
        match self.storage.delete_object(file_path).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%file_path, error = %format!("{err:#}"), "file deletion failed");
                false
            }
        }
    }

    pub fn public_url(&self, file_path: &str) -> String {
        format!("{}/{}", self.public_base, file_path)
    }
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `<user>/<YYYYMMDD_HHMMSS>_<suffix><.ext>`
fn storage_path(user_id: Uuid, file_name: &str, now: DateTime<Utc>, suffix: &str) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    format!(
        "{user_id}/{}_{suffix}{extension}",
        now.format("%Y%m%d_%H%M%S")
    )
}
