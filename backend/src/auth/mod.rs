pub mod identity;

use axum::{async_trait, extract::FromRequestParts, http::header, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;

pub use identity::{AuthenticatedUser, IdentityProvider, SupabaseIdentity};

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

/// Asks the identity provider to vouch for `token`.
pub async fn authenticate(state: &AppState, token: &str) -> AppResult<AuthenticatedUser> {
    match state.identity.verify(token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(AppError::unauthorized()),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "token verification failed");
            Err(AppError::unauthorized())
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        authenticate(state, bearer.token()).await
    }
}

/// Authenticates only when an `Authorization` header is present; a present
/// but invalid header is still rejected.
pub struct MaybeUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(header::AUTHORIZATION) {
            return Ok(MaybeUser(None));
        }
        AuthenticatedUser::from_request_parts(parts, state)
            .await
            .map(|user| MaybeUser(Some(user)))
    }
}
