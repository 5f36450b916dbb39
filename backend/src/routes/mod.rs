use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod auth;
pub mod chat;
pub mod files;
pub mod health;
pub mod history;
pub mod ws;

/// Room for multipart framing around the largest accepted upload.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state.config.cors_allowed_origins);
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let auth_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/verify", get(auth::verify));

    let chat_routes = Router::new()
        .route("/send", post(chat::send_message))
        .route("/stream", post(chat::stream_chat))
        .route("/ws", get(ws::chat_socket));

    let history_routes = Router::new()
        .route(
            "/conversations",
            get(history::list_conversations).post(history::create_conversation),
        )
        .route(
            "/conversations/:id",
            axum::routing::delete(history::delete_conversation),
        )
        .route("/conversations/:id/messages", get(history::list_messages));

    let files_routes = Router::new()
        .route(
            "/",
            post(files::upload_file).delete(files::delete_file),
        )
        .route("/url", get(files::file_url));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/chat", chat_routes)
        .nest("/api/history", history_routes)
        .nest("/api/files", files_routes)
        .route("/", get(health::service_info))
        .route("/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if allowed.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(allowed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
