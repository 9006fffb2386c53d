//! HTTP handlers for captures, resources and upload requests.
//! Bodies are JSON; persistence and upload bookkeeping are delegated to
//! `SyncEngine`.

use crate::{
    errors::AppError,
    models::{Capture, CaptureType, RequestStatus, Resource, UploadRequest},
    services::sync_engine::DeletionOutcome,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Body for `POST /captures`.
#[derive(Debug, Deserialize)]
pub struct CreateCaptureReq {
    pub capture_id: Option<String>,
    pub participant_id: String,
    pub capture_type: CaptureType,
    pub capture_folder: String,
    pub settings: Option<serde_json::Value>,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Body for `POST /captures/{capture_id}/resources`.
#[derive(Debug, Deserialize)]
pub struct CreateResourceReq {
    pub resource_id: Option<String>,
    pub file_type: String,
    pub file_path: String,
    pub file_size: i64,
    pub upload_url: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteCaptureQuery {
    #[serde(default)]
    pub remote: bool,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequestsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisteredResource {
    pub resource: Resource,
    pub upload_request: UploadRequest,
}

/// POST `/captures`: register a capture.
pub async fn create_capture(
    State(state): State<AppState>,
    Json(req): Json<CreateCaptureReq>,
) -> Result<impl IntoResponse, AppError> {
    if req.participant_id.trim().is_empty() || req.capture_folder.trim().is_empty() {
        return Err(AppError::bad_request(
            "participant_id and capture_folder are required",
        ));
    }

    let mut capture = Capture::new(
        req.participant_id,
        req.capture_type,
        req.capture_folder,
        req.settings.unwrap_or_else(|| json!({})),
    );
    if let Some(id) = req.capture_id.filter(|id| !id.is_empty()) {
        capture.capture_id = id;
    }
    if let Some(at) = req.captured_at {
        capture.captured_at = at;
    }

    state.engine.register_capture(&capture).await?;
    Ok((StatusCode::CREATED, Json(capture)))
}

/// GET `/captures/{capture_id}`
pub async fn get_capture(
    State(state): State<AppState>,
    Path(capture_id): Path<String>,
) -> Result<Json<Capture>, AppError> {
    Ok(Json(state.engine.get_capture(&capture_id).await?))
}

/// DELETE `/captures/{capture_id}`: `?remote=true` also deletes uploaded objects.
pub async fn delete_capture(
    State(state): State<AppState>,
    Path(capture_id): Path<String>,
    Query(q): Query<DeleteCaptureQuery>,
) -> Result<Json<DeletionOutcome>, AppError> {
    let outcome = state.engine.delete_capture(&capture_id, q.remote).await?;
    Ok(Json(outcome))
}

/// GET `/captures/{capture_id}/resources`
pub async fn list_capture_resources(
    State(state): State<AppState>,
    Path(capture_id): Path<String>,
) -> Result<Json<Vec<Resource>>, AppError> {
    state.engine.get_capture(&capture_id).await?;
    Ok(Json(
        state.engine.list_resources_in_capture(&capture_id).await?,
    ))
}

/// POST `/captures/{capture_id}/resources`: register a finalized artifact
/// and queue it for upload.
pub async fn create_resource(
    State(state): State<AppState>,
    Path(capture_id): Path<String>,
    Json(req): Json<CreateResourceReq>,
) -> Result<impl IntoResponse, AppError> {
    if req.file_size < 0 {
        return Err(AppError::bad_request("file_size must not be negative"));
    }
    if req.upload_url.trim().is_empty() || req.file_path.trim().is_empty() {
        return Err(AppError::bad_request("file_path and upload_url are required"));
    }

    let capture = state.engine.get_capture(&capture_id).await?;
    let mut resource = Resource::new(
        capture.capture_id,
        capture.capture_type,
        req.file_type,
        req.file_path,
        req.file_size,
        req.upload_url,
    );
    if let Some(id) = req.resource_id.filter(|id| !id.is_empty()) {
        resource.resource_id = id;
    }

    state.engine.register_resource(&resource).await?;
    let upload_request = state.engine.get_upload_request(&resource.resource_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisteredResource {
            resource,
            upload_request,
        }),
    ))
}

/// GET `/participants/{participant_id}/resources`
pub async fn list_participant_resources(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
) -> Result<Json<Vec<Resource>>, AppError> {
    Ok(Json(
        state
            .engine
            .list_resources_for_participant(&participant_id)
            .await?,
    ))
}

/// GET `/resources/{resource_id}`
pub async fn get_resource(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
) -> Result<Json<Resource>, AppError> {
    Ok(Json(state.engine.get_resource(&resource_id).await?))
}

/// DELETE `/resources/{resource_id}`: drops the resource and its request.
pub async fn delete_resource(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.engine.delete_resource(&resource_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::new(
            StatusCode::NOT_FOUND,
            format!("resource `{}` not found", resource_id),
        ))
    }
}

/// GET `/resources/{resource_id}/upload-request`
pub async fn get_resource_upload_request(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
) -> Result<Json<UploadRequest>, AppError> {
    Ok(Json(state.engine.get_upload_request(&resource_id).await?))
}

/// GET `/upload-requests`: `?status=` filters; without it every request is listed.
pub async fn list_upload_requests(
    State(state): State<AppState>,
    Query(q): Query<UploadRequestsQuery>,
) -> Result<Json<Vec<UploadRequest>>, AppError> {
    let statuses = match q.status.as_deref() {
        Some(raw) => vec![
            raw.parse::<RequestStatus>()
                .map_err(|err| AppError::bad_request(err.to_string()))?,
        ],
        None => RequestStatus::ALL.to_vec(),
    };

    let mut requests = Vec::new();
    for status in statuses {
        requests.extend(state.engine.list_upload_requests(status).await?);
    }
    Ok(Json(requests))
}
