use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::AppConfig;

/// User record as returned by the identity provider.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    /// The provider's record, unmodified.
    pub record: Value,
}

impl AuthenticatedUser {
    pub fn from_record(record: Value) -> Result<Self> {
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .context("user record has no id")?
            .parse()
            .context("user id is not a UUID")?;
        let email = record
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string);
        let display_name = record
            .get("display_name")
            .or_else(|| record.pointer("/user_metadata/display_name"))
            .or_else(|| record.pointer("/user_metadata/full_name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            id,
            email,
            display_name,
            record,
        })
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// `Ok(None)` when the provider does not recognise the token.
    async fn verify(&self, token: &str) -> Result<Option<AuthenticatedUser>>;
}

/// Verifies access tokens against Supabase Auth (`GET /auth/v1/user`).
pub struct SupabaseIdentity {
    client: Client,
    user_url: String,
    api_key: String,
}

impl SupabaseIdentity {
    pub fn new(client: Client, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client,
            user_url: format!("{}/auth/v1/user", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &AppConfig, client: Client) -> Self {
        Self::new(
            client,
            &config.supabase_url,
            config.supabase_service_role_key.clone(),
        )
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn verify(&self, token: &str) -> Result<Option<AuthenticatedUser>> {
        let response = self
            .client
            .get(&self.user_url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
            .context("failed to reach identity provider")?;

        match response.status() {
            status if status.is_success() => {
                let record: Value = response
                    .json()
                    .await
                    .context("identity provider returned invalid JSON")?;
                AuthenticatedUser::from_record(record).map(Some)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("identity provider returned {status}: {body}")
            }
        }
    }
}
