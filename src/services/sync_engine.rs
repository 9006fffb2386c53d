//! src/services/sync_engine.rs
//!
//! SyncEngine: the facade callers use. It registers captures and resources,
//! answers queries, runs sync passes through the `UploadDriver` and tears
//! captures down locally and remotely.

use crate::config::SyncConfig;
use crate::models::{Capture, RequestStatus, Resource, UploadRequest};
use crate::services::{
    deriver::derive_upload_request,
    record_store::{RecordStore, RemovedResource, StoreError},
    upload_driver::{ProgressSender, SyncReport, SyncState, UploadDriver},
    uploader::{BlobStore, Uploader},
};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Result of deleting a capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeletionOutcome {
    Deleted,
    /// Local records are gone but these remote objects could not be deleted.
    PartialDeletion { remaining: Vec<String> },
}

#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    blobstore: Arc<dyn BlobStore>,
    driver: UploadDriver,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        blobstore: Arc<dyn BlobStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            driver: UploadDriver::new(store.clone(), config.clone()),
            store,
            blobstore,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether some driver holds the upload lease on `request_id` right now.
    pub async fn is_uploading(&self, request_id: &str) -> EngineResult<bool> {
        Ok(self.driver.is_claimed(request_id).await?)
    }

    pub async fn register_capture(&self, capture: &Capture) -> EngineResult<String> {
        let id = self.store.add_capture(capture).await?;
        info!(
            capture_id = %id,
            participant_id = %capture.participant_id,
            "capture registered"
        );
        Ok(id)
    }

    /// Persist a resource together with a freshly derived upload request.
    pub async fn register_resource(&self, resource: &Resource) -> EngineResult<String> {
        self.store.get_capture(&resource.capture_id).await?;
        let request = derive_upload_request(resource);
        let id = self
            .store
            .add_resource_with_request(resource, &request)
            .await?;
        info!(
            resource_id = %id,
            request_id = %request.request_id,
            file_size = resource.file_size,
            "resource registered"
        );
        Ok(id)
    }

    pub async fn get_capture(&self, capture_id: &str) -> EngineResult<Capture> {
        Ok(self.store.get_capture(capture_id).await?)
    }

    pub async fn get_resource(&self, resource_id: &str) -> EngineResult<Resource> {
        Ok(self.store.get_resource(resource_id).await?)
    }

    pub async fn list_resources_in_capture(
        &self,
        capture_id: &str,
    ) -> EngineResult<Vec<Resource>> {
        Ok(self.store.list_resources_in_capture(capture_id).await?)
    }

    pub async fn list_resources_for_participant(
        &self,
        participant_id: &str,
    ) -> EngineResult<Vec<Resource>> {
        Ok(self
            .store
            .list_resources_for_participant(participant_id)
            .await?)
    }

    pub async fn list_upload_requests(
        &self,
        status: RequestStatus,
    ) -> EngineResult<Vec<UploadRequest>> {
        Ok(self.store.list_upload_requests(status).await?)
    }

    /// The upload request belonging to `resource_id`.
    pub async fn get_upload_request(&self, resource_id: &str) -> EngineResult<UploadRequest> {
        Ok(self.store.get_upload_request_for_resource(resource_id).await?)
    }

    /// Requests a sync pass should pick up, in-flight ones first.
    pub async fn eligible_requests(&self) -> EngineResult<Vec<UploadRequest>> {
        let mut requests = Vec::new();
        for status in RequestStatus::IN_FLIGHT {
            requests.extend(self.store.list_upload_requests(status).await?);
        }
        let failed = self.store.list_upload_requests(RequestStatus::Failed).await?;
        requests.extend(
            failed
                .into_iter()
                .filter(|request| request.is_eligible(self.config.max_failed_attempts)),
        );
        Ok(requests)
    }

    /// Run one sync pass.
    ///
    /// Requests registered while the pass runs are picked up before it
    /// returns. Each request is attempted at most once per pass. `Started`
    /// is sent for every batch with the running total of requests.
    pub async fn sync_upload(
        &self,
        uploader: &dyn Uploader,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> EngineResult<SyncReport> {
        let mut seen = HashSet::new();
        let mut report = SyncReport::default();
        let mut total_requests = 0;

        while !cancel.is_cancelled() {
            let batch: Vec<UploadRequest> = self
                .eligible_requests()
                .await?
                .into_iter()
                .filter(|request| seen.insert(request.request_id.clone()))
                .collect();
            if batch.is_empty() {
                break;
            }
            total_requests += batch.len();
            if let Some(sender) = progress {
                let _ = sender.send(SyncState::Started { total_requests });
            }
            debug!(requests = batch.len(), total_requests, "driving sync batch");

            for (request_id, outcome) in self
                .driver
                .drive_batch(uploader, batch, cancel, progress)
                .await?
            {
                report.record(request_id, &outcome);
            }
        }
        report.interrupted |= cancel.is_cancelled();

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            aborted = report.aborted.len(),
            interrupted = report.interrupted,
            "sync pass finished"
        );
        if let Some(sender) = progress {
            let state = if total_requests > 0 {
                SyncState::Completed {
                    report: report.clone(),
                }
            } else {
                SyncState::NoOp
            };
            let _ = sender.send(state);
        }
        Ok(report)
    }

    /// Delete a capture with its resources and requests.
    ///
    /// Local records go in one transaction, which also reports exactly the
    /// resources it removed. The capture folder is then removed best-effort,
    /// unfinished multipart sessions are aborted and, when asked, every
    /// removed resource's remote object is deleted. Remote failures do not
    /// restore anything; they are returned.
    pub async fn delete_capture(
        &self,
        capture_id: &str,
        also_delete_remote: bool,
    ) -> EngineResult<DeletionOutcome> {
        let capture = match self.store.get_capture(capture_id).await {
            Ok(capture) => capture,
            Err(StoreError::NotFound { .. }) => {
                debug!(capture_id, "capture already absent");
                return Ok(DeletionOutcome::Deleted);
            }
            Err(err) => return Err(err.into()),
        };
        let Some(removed) = self.store.delete_records_in_capture(capture_id).await? else {
            debug!(capture_id, "capture removed concurrently");
            return Ok(DeletionOutcome::Deleted);
        };
        self.remove_capture_folder(&capture.capture_folder).await;
        info!(capture_id, resources = removed.len(), "capture records deleted");

        for resource in &removed {
            self.abort_open_upload(resource).await;
        }
        if !also_delete_remote {
            return Ok(DeletionOutcome::Deleted);
        }

        let mut remaining = Vec::new();
        for resource in removed {
            let url = resource.upload_url;
            if let Err(err) = self.blobstore.delete_object(&url).await {
                warn!(capture_id, upload_url = %url, error = %err, "remote delete failed");
                remaining.push(url);
            }
        }
        if remaining.is_empty() {
            Ok(DeletionOutcome::Deleted)
        } else {
            Ok(DeletionOutcome::PartialDeletion { remaining })
        }
    }

    /// Delete one resource and its upload request. Finished remote objects
    /// are kept; an unfinished multipart session is aborted.
    pub async fn delete_resource(&self, resource_id: &str) -> EngineResult<bool> {
        let Some(removed) = self.store.delete_resource(resource_id).await? else {
            return Ok(false);
        };
        info!(resource_id, "resource deleted");
        self.abort_open_upload(&removed).await;
        Ok(true)
    }

    /// Drop COMPLETED requests untouched for longer than `retention`.
    pub async fn purge_completed(&self, retention: Duration) -> EngineResult<u64> {
        let purged = self
            .store
            .purge_completed_upload_requests(Utc::now() - retention)
            .await?;
        if purged > 0 {
            info!(purged, "purged completed upload requests");
        }
        Ok(purged)
    }

    async fn abort_open_upload(&self, removed: &RemovedResource) {
        let Some(upload_id) = removed.open_upload_id.as_deref() else {
            return;
        };
        match self
            .blobstore
            .abort_multipart_upload(&removed.upload_url, upload_id)
            .await
        {
            Ok(()) => debug!(resource_id = %removed.resource_id, upload_id, "upload aborted"),
            Err(err) => warn!(
                resource_id = %removed.resource_id,
                upload_id,
                error = %err,
                "failed to abort multipart upload"
            ),
        }
    }

    /// Only folders strictly inside `data_dir` are ever removed.
    async fn remove_capture_folder(&self, capture_folder: &str) {
        let Some(folder) = capture_dir(&self.config.data_dir, capture_folder) else {
            warn!(capture_folder, "capture folder outside the data directory, keeping it");
            return;
        };
        match fs::remove_dir_all(&folder).await {
            Ok(()) => debug!("removed capture folder {}", folder.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("capture folder {} already missing", folder.display());
            }
            Err(err) => warn!("failed to remove capture folder {}: {}", folder.display(), err),
        }
    }
}

fn capture_dir(data_dir: &Path, capture_folder: &str) -> Option<PathBuf> {
    let folder = Path::new(capture_folder);
    if folder
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return None;
    }
    let resolved = data_dir.join(folder);
    (resolved.starts_with(data_dir) && resolved != data_dir).then_some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaptureType, ResourceStatus, UploadError, UploadResult};
    use crate::services::{
        local_blobstore::LocalBlobStore, record_store::SqliteRecordStore,
        uploader::MultipartUploader,
    };
    use futures::{
        StreamExt,
        stream::{self, BoxStream},
    };
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct Fixture {
        engine: SyncEngine,
        store: Arc<SqliteRecordStore>,
        blobs: Arc<LocalBlobStore>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteRecordStore::open_in_memory().await.unwrap());
        let blobs = Arc::new(LocalBlobStore::new(dir.path().join("blobs")));
        let config = SyncConfig {
            part_size_bytes: 100,
            min_part_size_bytes: 0,
            data_dir: dir.path().join("captures"),
            ..SyncConfig::default()
        };
        let engine = SyncEngine::new(store.clone(), blobs.clone(), config);
        Fixture {
            engine,
            store,
            blobs,
            _dir: dir,
        }
    }

    async fn capture_with_file(fx: &Fixture, folder: &str, len: usize) -> (Capture, Resource) {
        let capture = Capture::new("p1", CaptureType::Image, folder, json!({ "iso": 200 }));
        fx.engine.register_capture(&capture).await.unwrap();

        let capture_dir = fx.engine.config().data_dir.join(folder);
        std::fs::create_dir_all(&capture_dir).unwrap();
        let path = capture_dir.join("frame.jpg");
        std::fs::write(&path, vec![1u8; len]).unwrap();

        let resource = Resource::new(
            &capture.capture_id,
            CaptureType::Image,
            "jpg",
            path.to_string_lossy(),
            len as i64,
            format!("https://bucket/{folder}/frame.jpg"),
        );
        fx.engine.register_resource(&resource).await.unwrap();
        (capture, resource)
    }

    #[tokio::test]
    async fn test_register_resource_requires_capture() {
        let fx = fixture().await;
        let resource = Resource::new("nope", CaptureType::Image, "jpg", "/f", 1, "https://x/f");
        let err = fx.engine.register_resource(&resource).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_register_resource_derives_pending_request() {
        let fx = fixture().await;
        let (_, resource) = capture_with_file(&fx, "cap-a", 10).await;

        let request = fx.engine.get_upload_request(&resource.resource_id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.upload_url, resource.upload_url);
        assert_eq!(request.file_size, 10);
    }

    #[tokio::test]
    async fn test_sync_uploads_everything_and_reports_progress() {
        let fx = fixture().await;
        let (_, resource) = capture_with_file(&fx, "cap-a", 250).await;
        let uploader = MultipartUploader::new(fx.blobs.clone(), fx.engine.config());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = fx
            .engine
            .sync_upload(&uploader, &CancellationToken::new(), Some(&tx))
            .await
            .unwrap();
        assert_eq!(report.completed.len(), 1);

        let request = fx.engine.get_upload_request(&resource.resource_id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!((request.bytes_uploaded, request.next_part), (250, 4));
        let stored = fx.engine.get_resource(&resource.resource_id).await.unwrap();
        assert_eq!(stored.status, ResourceStatus::Completed);

        let object = fx.blobs.object_path_for(&resource.upload_url).unwrap();
        assert_eq!(std::fs::read(object).unwrap().len(), 250);

        drop(tx);
        let mut states = Vec::new();
        while let Some(state) = rx.recv().await {
            states.push(state);
        }
        assert_eq!(states.first(), Some(&SyncState::Started { total_requests: 1 }));
        assert!(matches!(states.last(), Some(SyncState::Completed { .. })));
    }

    /// Registers one more resource the first time it is asked to upload.
    struct RegisteringUploader {
        inner: MultipartUploader<LocalBlobStore>,
        engine: SyncEngine,
        late: Mutex<Option<Resource>>,
    }

    impl Uploader for RegisteringUploader {
        fn upload(&self, request: UploadRequest) -> BoxStream<'_, UploadResult> {
            let late = self.late.lock().unwrap().take();
            let register = async move {
                if let Some(resource) = late {
                    self.engine.register_resource(&resource).await.unwrap();
                }
            };
            stream::once(register)
                .filter_map(|()| async { None::<UploadResult> })
                .chain(self.inner.upload(request))
                .boxed()
        }
    }

    #[tokio::test]
    async fn test_started_reports_running_total_across_batches() {
        let fx = fixture().await;
        capture_with_file(&fx, "cap-a", 50).await;

        let late_capture = Capture::new("p1", CaptureType::Image, "cap-b", json!({}));
        fx.engine.register_capture(&late_capture).await.unwrap();
        let path = fx.engine.config().data_dir.join("late.jpg");
        std::fs::write(&path, vec![2u8; 50]).unwrap();
        let late = Resource::new(
            &late_capture.capture_id,
            CaptureType::Image,
            "jpg",
            path.to_string_lossy(),
            50,
            "https://bucket/cap-b/late.jpg",
        );

        let uploader = RegisteringUploader {
            inner: MultipartUploader::new(fx.blobs.clone(), fx.engine.config()),
            engine: fx.engine.clone(),
            late: Mutex::new(Some(late)),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = fx
            .engine
            .sync_upload(&uploader, &CancellationToken::new(), Some(&tx))
            .await
            .unwrap();
        assert_eq!(report.completed.len(), 2);

        drop(tx);
        let mut totals = Vec::new();
        while let Some(state) = rx.recv().await {
            if let SyncState::Started { total_requests } = state {
                totals.push(total_requests);
            }
        }
        assert_eq!(totals, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_sync_with_nothing_eligible_is_a_no_op() {
        let fx = fixture().await;
        let uploader = MultipartUploader::new(fx.blobs.clone(), fx.engine.config());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = fx
            .engine
            .sync_upload(&uploader, &CancellationToken::new(), Some(&tx))
            .await
            .unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(rx.recv().await, Some(SyncState::NoOp));
    }

    #[tokio::test]
    async fn test_exhausted_or_fatal_failures_are_not_retried() {
        let fx = fixture().await;
        let (_, first) = capture_with_file(&fx, "cap-a", 10).await;
        let (_, second) = capture_with_file(&fx, "cap-b", 10).await;
        let (_, third) = capture_with_file(&fx, "cap-c", 10).await;

        let mark = |resource_id: String, attempts: u32, error: UploadError| {
            let store = fx.store.clone();
            async move {
                let mut request = store
                    .get_upload_request_for_resource(&resource_id)
                    .await
                    .unwrap();
                request.status = RequestStatus::Failed;
                request.failed_attempts = attempts;
                request.retryable = error.is_transient();
                request.last_error = Some(error.to_string());
                store.update_upload_request(&request).await.unwrap();
            }
        };
        mark(first.resource_id.clone(), 1, UploadError::transient("timeout")).await;
        mark(second.resource_id.clone(), 3, UploadError::transient("timeout")).await;
        mark(third.resource_id.clone(), 1, UploadError::fatal("forbidden")).await;

        let eligible = fx.engine.eligible_requests().await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].resource_id, first.resource_id);
    }

    #[tokio::test]
    async fn test_delete_capture_removes_records_and_folder() {
        let fx = fixture().await;
        let (capture, resource) = capture_with_file(&fx, "cap-a", 10).await;
        let folder = fx.engine.config().data_dir.join("cap-a");
        assert!(folder.exists());

        let outcome = fx.engine.delete_capture(&capture.capture_id, false).await.unwrap();
        assert_eq!(outcome, DeletionOutcome::Deleted);
        assert!(!folder.exists());
        assert!(matches!(
            fx.engine.get_resource(&resource.resource_id).await,
            Err(EngineError::Store(StoreError::NotFound { .. }))
        ));
        assert!(matches!(
            fx.engine.get_upload_request(&resource.resource_id).await,
            Err(EngineError::Store(StoreError::NotFound { .. }))
        ));

        // Deleting again is not an error.
        let outcome = fx.engine.delete_capture(&capture.capture_id, true).await.unwrap();
        assert_eq!(outcome, DeletionOutcome::Deleted);
    }

    #[tokio::test]
    async fn test_delete_capture_also_deletes_remote_objects() {
        let fx = fixture().await;
        let (capture, resource) = capture_with_file(&fx, "cap-a", 150).await;
        let uploader = MultipartUploader::new(fx.blobs.clone(), fx.engine.config());
        fx.engine
            .sync_upload(&uploader, &CancellationToken::new(), None)
            .await
            .unwrap();
        let object = fx.blobs.object_path_for(&resource.upload_url).unwrap();
        assert!(object.exists());

        let outcome = fx.engine.delete_capture(&capture.capture_id, true).await.unwrap();
        assert_eq!(outcome, DeletionOutcome::Deleted);
        assert!(!object.exists());
    }

    #[tokio::test]
    async fn test_delete_resource_drops_its_request() {
        let fx = fixture().await;
        let (_, resource) = capture_with_file(&fx, "cap-a", 10).await;

        assert!(fx.engine.delete_resource(&resource.resource_id).await.unwrap());
        assert!(!fx.engine.delete_resource(&resource.resource_id).await.unwrap());
        assert!(fx
            .engine
            .list_upload_requests(RequestStatus::Pending)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_deleting_unfinished_upload_aborts_its_session() {
        let fx = fixture().await;
        let (_, resource) = capture_with_file(&fx, "cap-a", 10).await;

        let upload_id = fx
            .blobs
            .create_multipart_upload(&resource.upload_url)
            .await
            .unwrap();
        let staging = fx.blobs.base_path.join(".multipart").join(&upload_id);
        assert!(staging.exists());
        let mut request = fx.engine.get_upload_request(&resource.resource_id).await.unwrap();
        request.upload_id = Some(upload_id);
        request.status = RequestStatus::Started;
        fx.store.update_upload_request(&request).await.unwrap();

        assert!(fx.engine.delete_resource(&resource.resource_id).await.unwrap());
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_deleting_capture_aborts_open_sessions() {
        let fx = fixture().await;
        let (capture, resource) = capture_with_file(&fx, "cap-a", 10).await;

        let upload_id = fx
            .blobs
            .create_multipart_upload(&resource.upload_url)
            .await
            .unwrap();
        let staging = fx.blobs.base_path.join(".multipart").join(&upload_id);
        let mut request = fx.engine.get_upload_request(&resource.resource_id).await.unwrap();
        request.upload_id = Some(upload_id);
        request.status = RequestStatus::Uploading;
        fx.store.update_upload_request(&request).await.unwrap();

        let outcome = fx.engine.delete_capture(&capture.capture_id, false).await.unwrap();
        assert_eq!(outcome, DeletionOutcome::Deleted);
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_purge_keeps_recent_completions() {
        let fx = fixture().await;
        capture_with_file(&fx, "cap-a", 10).await;
        let uploader = MultipartUploader::new(fx.blobs.clone(), fx.engine.config());
        fx.engine
            .sync_upload(&uploader, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(fx.engine.purge_completed(Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(fx.engine.purge_completed(Duration::seconds(-1)).await.unwrap(), 1);
    }

    #[test]
    fn test_capture_dir_stays_inside_data_dir() {
        let root = Path::new("/srv/captures");
        assert_eq!(
            capture_dir(root, "cap-a"),
            Some(PathBuf::from("/srv/captures/cap-a"))
        );
        assert_eq!(
            capture_dir(root, "/srv/captures/cap-b"),
            Some(PathBuf::from("/srv/captures/cap-b"))
        );
        assert_eq!(capture_dir(root, "../etc"), None);
        assert_eq!(capture_dir(root, "/etc"), None);
        assert_eq!(capture_dir(root, ""), None);
    }
}
