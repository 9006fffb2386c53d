use crate::{errors::AppError, services::upload_driver::SyncReport, state::AppState};
use axum::{Json, extract::State};
use tracing::info;

/// POST `/sync`: run one sync pass and return its report.
///
/// The pass stops early when the server shuts down.
pub async fn trigger_sync(State(state): State<AppState>) -> Result<Json<SyncReport>, AppError> {
    info!("sync pass requested over HTTP");
    let cancel = state.shutdown.child_token();
    let report = state
        .engine
        .sync_upload(&*state.uploader, &cancel, None)
        .await?;
    Ok(Json(report))
}
