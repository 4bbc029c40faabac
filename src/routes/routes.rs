//! Defines routes for the image store API.
//!
//! ## Structure
//! - **File endpoints**
//!   - `POST /api/v1/files/upload` — authenticated multipart image upload
//!   - `GET  /api/v1/files/view/{file_name}` — serve stored bytes; accepts
//!     an optional `uid` owner hint and tolerates anonymous callers
//!
//! - **Probes** (mounted at root)
//!   - `GET /healthz` — liveness
//!   - `GET /readyz`  — readiness, round-trips the object backend
//!
//! `{file_name}` is a `{fingerprint}.{extension}` reference such as
//! `3a7b...e1.jpg`.

use crate::{
    handlers::{
        file_handlers::{upload_image, view_image},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all image-store routes.
///
/// The router carries shared state (`AppState`) to all handlers.
/// `body_limit` raises the framework's request-body cap above the store's
/// payload cap, so an oversized upload reaches the store's own validation
/// and gets the 400 taxonomy instead of a framework 413.
pub fn routes(body_limit: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // file endpoints
        .route("/api/v1/files/upload", post(upload_image))
        .route("/api/v1/files/view/{file_name}", get(view_image))
        .layer(DefaultBodyLimit::max(body_limit))
}
