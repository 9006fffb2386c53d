//! Defines routes for the capture sync control surface.
//!
//! ## Structure
//! - **Captures**
//!   - `POST   /captures`: register a capture
//!   - `GET    /captures/{capture_id}`: fetch a capture
//!   - `DELETE /captures/{capture_id}`: delete a capture (`?remote=true` also
//!     deletes uploaded objects)
//!   - `GET    /captures/{capture_id}/resources`: list its resources
//!   - `POST   /captures/{capture_id}/resources`: register a resource
//!
//! - **Resources and uploads**
//!   - `GET    /participants/{participant_id}/resources`
//!   - `GET    /resources/{resource_id}`, `DELETE /resources/{resource_id}`
//!   - `GET    /resources/{resource_id}/upload-request`
//!   - `GET    /upload-requests?status=`
//!   - `POST   /sync`: run one sync pass

use crate::{
    handlers::{
        capture_handlers::{
            create_capture, create_resource, delete_capture, delete_resource, get_capture,
            get_resource, get_resource_upload_request, list_capture_resources,
            list_participant_resources, list_upload_requests,
        },
        health_handlers::{healthz, readyz},
        sync_handlers::trigger_sync,
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. Handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/captures", post(create_capture))
        .route(
            "/captures/{capture_id}",
            get(get_capture).delete(delete_capture),
        )
        .route(
            "/captures/{capture_id}/resources",
            get(list_capture_resources).post(create_resource),
        )
        .route(
            "/participants/{participant_id}/resources",
            get(list_participant_resources),
        )
        .route(
            "/resources/{resource_id}",
            get(get_resource).delete(delete_resource),
        )
        .route(
            "/resources/{resource_id}/upload-request",
            get(get_resource_upload_request),
        )
        .route("/upload-requests", get(list_upload_requests))
        .route("/sync", post(trigger_sync))
}
