use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:3001";
const DEFAULT_ALLOWED_FILE_TYPES: &str =
    "image/png,image/jpeg,image/jpg,image/gif,application/pdf,text/plain,text/csv,application/json";

/// Which completion relay backend serves chat requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayBackend {
    Sdk,
    Http,
    Cli,
}

impl FromStr for RelayBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sdk" => Ok(Self::Sdk),
            "http" => Ok(Self::Http),
            "cli" => Ok(Self::Cli),
            other => Err(anyhow!("unknown relay backend {other:?}, expected sdk, http or cli")),
        }
    }
}

impl RelayBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sdk => "sdk",
            Self::Http => "http",
            Self::Cli => "cli",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub cors_allowed_origins: Vec<String>,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub storage_bucket: String,
    pub max_upload_bytes: usize,
    pub allowed_file_types: Vec<String>,
    pub relay_backend: RelayBackend,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub anthropic_model: String,
    pub anthropic_max_tokens: u32,
    pub relay_timeout_secs: u64,
    pub relay_cli_program: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let supabase_url = env::var("SUPABASE_URL").context("SUPABASE_URL must be set")?;
        Url::parse(&supabase_url).context("SUPABASE_URL must be a valid URL")?;
        let supabase_url = supabase_url.trim_end_matches('/').to_string();
        let supabase_anon_key =
            env::var("SUPABASE_ANON_KEY").context("SUPABASE_ANON_KEY must be set")?;
        let supabase_service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .context("SUPABASE_SERVICE_ROLE_KEY must be set")?;
        let cors_allowed_origins = parse_list(
            &env::var("CORS_ALLOWED_ORIGIN").unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.to_string()),
        );
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL")
            .ok()
            .or_else(|| Some(format!("{supabase_url}/storage/v1/s3")));
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let storage_bucket =
            env::var("STORAGE_BUCKET").unwrap_or_else(|_| "chat-files".to_string());
        let max_file_size_mb: usize = env::var("MAX_FILE_SIZE_MB")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("MAX_FILE_SIZE_MB must be an integer")?;
        let allowed_file_types = parse_list(
            &env::var("ALLOWED_FILE_TYPES")
                .unwrap_or_else(|_| DEFAULT_ALLOWED_FILE_TYPES.to_string()),
        );
        let relay_backend = env::var("RELAY_BACKEND")
            .unwrap_or_else(|_| "sdk".to_string())
            .parse()
            .context("RELAY_BACKEND is invalid")?;
        let anthropic_api_key = env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let anthropic_base_url = env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let anthropic_model = env::var("ANTHROPIC_MODEL")
            .unwrap_or_else(|_| "claude-3-5-sonnet-20241022".to_string());
        let anthropic_max_tokens = env::var("ANTHROPIC_MAX_TOKENS")
            .unwrap_or_else(|_| "4096".to_string())
            .parse()
            .context("ANTHROPIC_MAX_TOKENS must be an integer")?;
        let relay_timeout_secs = env::var("RELAY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .context("RELAY_TIMEOUT_SECS must be an integer")?;
        let relay_cli_program =
            env::var("RELAY_CLI_PROGRAM").unwrap_or_else(|_| "claude".to_string());

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            supabase_url,
            supabase_anon_key,
            supabase_service_role_key,
            cors_allowed_origins,
            aws_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            storage_bucket,
            max_upload_bytes: max_file_size_mb * 1024 * 1024,
            allowed_file_types,
            relay_backend,
            anthropic_api_key,
            anthropic_base_url,
            anthropic_model,
            anthropic_max_tokens,
            relay_timeout_secs,
            relay_cli_program,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
