//! 라우트 설정 모듈.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::api::handlers::{
    archive_handler, create_share_handler, download_file_handler, health_handler, index_handler,
    manifest_handler, qr_handler, readiness_handler, receive_page_handler, revoke_share_handler,
};
use crate::api::middlewares::jwt_auth;
use crate::api::state::AppState;
use crate::config::APP_CONFIG;

/// Room for multipart boundaries and option fields on top of the file bytes.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Creates and configures all application routes.
///
/// # Routes
///
/// ## Health Check Routes
/// - `GET /health` - Liveness probe
/// - `GET /ready` - Readiness probe
///
/// ## Template Routes
/// - `GET /` - Send/receive page
/// - `GET /s/{code}` - Receive page for a share code
///
/// ## API Routes (v1)
/// - `POST /v1/shares` - Create a share (requires JWT authentication)
/// - `GET /v1/shares/{code}` - Share manifest
/// - `DELETE /v1/shares/{code}` - Revoke a share (requires JWT authentication, owner only)
/// - `GET /v1/shares/{code}/qr.png` - QR code image
/// - `GET /v1/shares/{code}/files/{position}` - Download one file
/// - `GET /v1/shares/{code}/archive` - Download files as ZIP
pub fn create_routes(state: AppState) -> Router {
    // API v1 routes; mutations need a visitor token
    let v1_routes = Router::new()
        .route(
            "/shares",
            post(create_share_handler).route_layer(middleware::from_fn(jwt_auth)),
        )
        .route(
            "/shares/{code}",
            get(manifest_handler)
                .merge(delete(revoke_share_handler).route_layer(middleware::from_fn(jwt_auth))),
        )
        .route("/shares/{code}/qr.png", get(qr_handler))
        .route("/shares/{code}/files/{position}", get(download_file_handler))
        .route("/shares/{code}/archive", get(archive_handler))
        .layer(DefaultBodyLimit::max(
            APP_CONFIG.max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
        ));

    // Main router
    Router::new()
        // Health check routes (no auth required)
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        // Template routes
        .route("/", get(index_handler))
        .route("/s/{code}", get(receive_page_handler))
        // API routes
        .nest("/v1", v1_routes)
        // Shared state
        .with_state(state)
}
