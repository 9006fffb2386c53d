use crate::services::{local_blobstore::LocalBlobStore, sync_engine::SyncEngine, uploader::Uploader};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub uploader: Arc<dyn Uploader>,
    /// Pool behind the record store, used by readiness checks.
    pub db: Arc<SqlitePool>,
    pub blobstore: Arc<LocalBlobStore>,
    /// Cancelled on shutdown; sync passes started over HTTP use child tokens.
    pub shutdown: CancellationToken,
}
