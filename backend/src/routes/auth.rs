use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::Profile,
    state::AppState,
};

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub user_id: Uuid,
    pub display_name: Option<String>,
}

pub async fn me(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Profile>> {
    state
        .history
        .profile(user.id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "profile not found"))
}

pub async fn verify(user: AuthenticatedUser) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        valid: true,
        user_id: user.id,
        display_name: user.display_name,
    })
}
