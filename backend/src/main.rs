use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use msg_backend::{
    auth::SupabaseIdentity, config::AppConfig, db, relay, routes, state::AppState,
    storage::S3Storage, store::PgConversationStore,
};

const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        supabase_url = %config.supabase_url,
        storage_bucket = %config.storage_bucket,
        relay_backend = config.relay_backend.as_str(),
        "loaded backend configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let store = Arc::new(PgConversationStore::new(pool));
    let storage = Arc::new(S3Storage::from_config(&config).await?);

    let http = reqwest::Client::builder()
        .timeout(IDENTITY_TIMEOUT)
        .build()
        .context("failed to build identity client")?;
    let identity = Arc::new(SupabaseIdentity::from_config(&config, http));
    let relay = relay::build_relay(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("invalid SERVER_HOST/SERVER_PORT")?;

    let state = AppState::new(config, store, storage, identity, relay);
    let app = routes::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_ok() {
        tracing::info!("received shutdown signal");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
