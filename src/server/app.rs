use axum::routing::{get, patch};
use axum::{middleware, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::error;

use super::middleware::rate_limit;
use super::AppState;

/// Maximum request body size (64 KB)
const MAX_BODY_SIZE: usize = 64 * 1024;

pub fn create_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.settings.server.cors_origins);

    // Message routes carry JSON bodies and get the body size cap.
    let message_routes = Router::new()
        .route(
            "/v1/users/{user_id}/chats/{peer_id}/messages",
            get(api::list_messages).post(api::send_message),
        )
        .route("/v1/messages/{message_id}/read", patch(api::read_message))
        .route("/v1/users/{user_id}/chats", get(api::list_chats))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE));

    let ws_routes = Router::new().route(
        "/v1/users/{user_id}/chats/{peer_id}/subscribe",
        get(api::subscribe),
    );

    Router::new()
        .route("/v1/healthcheck", get(api::healthcheck))
        .merge(message_routes)
        .merge(ws_routes)
        .fallback(error::not_found)
        .method_not_allowed_fallback(error::method_not_allowed)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(CatchPanicLayer::custom(error::handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Build CORS layer from configured origins
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    use tower_http::cors::AllowOrigin;

    if origins.is_empty() {
        // Development mode: allow any origin (with warning)
        tracing::warn!(
            "CORS: No origins configured, allowing any origin. Configure SERVER__CORS_ORIGINS for production."
        );
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        tracing::info!("CORS: Restricting to {} configured origins", origins.len());
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PATCH,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    }
}
