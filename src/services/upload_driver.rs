//! src/services/upload_driver.rs
//!
//! Drives upload requests through their state machine.
//!
//! For each request the driver pulls results from an `Uploader` stream one at
//! a time and persists the resulting checkpoint before asking for the next
//! one. `apply_result` holds the transition rules and is pure; everything
//! else here is bookkeeping around it: upload leases, deletion checks,
//! cancellation, resource status mirroring and progress reporting.
//!
//! A request is only driven under a lease taken in the record store, so two
//! drivers sharing a database never upload the same request at once. Every
//! checkpoint renews the lease and is refused once another driver took over.

use crate::config::SyncConfig;
use crate::models::{RequestStatus, ResourceStatus, UploadError, UploadRequest, UploadResult};
use crate::services::{
    record_store::{RecordStore, StoreError, StoreResult},
    uploader::Uploader,
};
use chrono::{DateTime, Duration, Utc};
use futures::{StreamExt, future, stream};
use serde::Serialize;
use std::{mem, sync::Arc};
use tokio::{fs, runtime::Handle, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Progress events emitted during a sync pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    /// Sent for every batch a pass picks up, with the running total.
    Started { total_requests: usize },
    InProgress {
        request_id: String,
        bytes_uploaded: i64,
        file_size: i64,
    },
    Failed {
        request_id: String,
        error: UploadError,
    },
    Completed { report: SyncReport },
    /// Nothing was eligible for upload.
    NoOp,
}

pub type ProgressSender = mpsc::UnboundedSender<SyncState>;

/// How driving one request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Completed,
    /// The request was already COMPLETED when the driver got to it.
    AlreadyCompleted,
    Failed(UploadError),
    /// Another driver holds the lease on this request, or took it over.
    Skipped,
    /// The request or its resource was deleted while uploading.
    Aborted,
    /// Cancelled; the last checkpoint stays in place.
    Interrupted,
}

/// Summary of one sync pass, by request id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub aborted: Vec<String>,
    pub interrupted: bool,
}

impl SyncReport {
    pub fn record(&mut self, request_id: String, outcome: &RequestOutcome) {
        match outcome {
            RequestOutcome::Completed | RequestOutcome::AlreadyCompleted => {
                self.completed.push(request_id)
            }
            RequestOutcome::Failed(_) => self.failed.push(request_id),
            RequestOutcome::Skipped => self.skipped.push(request_id),
            RequestOutcome::Aborted => self.aborted.push(request_id),
            RequestOutcome::Interrupted => self.interrupted = true,
        }
    }

    /// Number of requests this pass touched.
    pub fn processed(&self) -> usize {
        self.completed.len() + self.failed.len() + self.skipped.len() + self.aborted.len()
    }
}

/// Apply one uploader result to a request.
///
/// Returns the advanced request, or the error to record when the result is a
/// failure or breaks the upload protocol. Never touches storage.
pub fn apply_result(
    request: &UploadRequest,
    result: &UploadResult,
    now: DateTime<Utc>,
) -> Result<UploadRequest, UploadError> {
    let mut next = request.clone();
    match result {
        UploadResult::Started { upload_id, .. } => {
            if request.status == RequestStatus::Completed {
                return Err(UploadError::fatal("upload restarted after completion"));
            }
            next.upload_id = Some(upload_id.clone());
            next.status = RequestStatus::Started;
        }
        UploadResult::Success {
            part_number,
            bytes_uploaded,
            ..
        } => {
            if request.upload_id.is_none() {
                return Err(UploadError::fatal(format!(
                    "part {part_number} acknowledged before the upload started"
                )));
            }
            if *part_number != request.next_part {
                return Err(UploadError::fatal(format!(
                    "part {part_number} acknowledged, expected part {}",
                    request.next_part
                )));
            }
            if *bytes_uploaded <= 0 || *bytes_uploaded > request.remaining_bytes() {
                return Err(UploadError::fatal(format!(
                    "part {part_number} of {bytes_uploaded} bytes overflows {} remaining",
                    request.remaining_bytes()
                )));
            }
            next.bytes_uploaded += bytes_uploaded;
            next.next_part += 1;
            next.status = if next.next_part == 2 {
                RequestStatus::Started
            } else {
                RequestStatus::Uploading
            };
            next.failed_attempts = 0;
            next.last_error = None;
            next.retryable = true;
        }
        UploadResult::Completed { .. } => {
            if request.upload_id.is_none() {
                return Err(UploadError::fatal("completion reported before the upload started"));
            }
            if request.bytes_uploaded != request.file_size {
                return Err(UploadError::fatal(format!(
                    "completion reported with {} of {} bytes uploaded",
                    request.bytes_uploaded, request.file_size
                )));
            }
            next.status = RequestStatus::Completed;
            next.last_error = None;
        }
        UploadResult::Failure { error, .. } => return Err(error.clone()),
    }
    next.last_updated_time = now;
    Ok(next)
}

/// Record a failed attempt; the checkpoint stays where it was.
pub fn mark_failed(
    request: &UploadRequest,
    error: &UploadError,
    now: DateTime<Utc>,
) -> UploadRequest {
    let mut next = request.clone();
    next.status = RequestStatus::Failed;
    next.failed_attempts = request.failed_attempts.saturating_add(1);
    next.last_error = Some(error.to_string());
    next.retryable = error.is_transient();
    next.last_updated_time = now;
    next
}

/// Upload lease on one request.
///
/// Released once driving ends. If the drive is dropped halfway the release is
/// spawned instead; without a runtime the lease simply expires.
struct Lease {
    store: Arc<dyn RecordStore>,
    request_id: String,
    owner: String,
    held: bool,
}

impl Lease {
    async fn release(mut self) {
        self.held = false;
        if let Err(err) = self
            .store
            .release_upload_request(&self.request_id, &self.owner)
            .await
        {
            warn!(request_id = %self.request_id, error = %err, "failed to release upload lease");
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        let request_id = mem::take(&mut self.request_id);
        let owner = mem::take(&mut self.owner);
        handle.spawn(async move {
            let _ = store.release_upload_request(&request_id, &owner).await;
        });
    }
}

/// Whether a checkpoint landed, the record vanished underneath us, or another
/// driver took the lease over.
enum Checkpoint {
    Persisted,
    Gone,
    Lost,
}

#[derive(Clone)]
pub struct UploadDriver {
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
    /// Lease owner id; clones of a driver share it.
    owner: String,
}

impl UploadDriver {
    pub fn new(store: Arc<dyn RecordStore>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            owner: Uuid::new_v4().to_string(),
        }
    }

    /// Whether some driver holds a live lease on `request_id`.
    pub async fn is_claimed(&self, request_id: &str) -> StoreResult<bool> {
        self.store
            .is_upload_request_claimed(request_id, Utc::now())
            .await
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.config.claim_ttl_secs)
    }

    /// Take the lease on `request_id`, or `None` if another driver holds it.
    async fn try_claim(&self, request_id: &str) -> StoreResult<Option<Lease>> {
        let now = Utc::now();
        let claimed = self
            .store
            .claim_upload_request(request_id, &self.owner, now, self.lease_until(now))
            .await?;
        Ok(claimed.then(|| Lease {
            store: self.store.clone(),
            request_id: request_id.to_string(),
            owner: self.owner.clone(),
            held: true,
        }))
    }

    /// Drive a batch of requests. Requests are independent: an upload failure
    /// only ends its own request. Store errors abort the batch.
    pub async fn drive_batch(
        &self,
        uploader: &dyn Uploader,
        requests: Vec<UploadRequest>,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> StoreResult<Vec<(String, RequestOutcome)>> {
        let outcomes: Vec<StoreResult<(String, RequestOutcome)>> = stream::iter(requests)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|request| async move {
                let request_id = request.request_id.clone();
                self.drive(uploader, request, cancel, progress)
                    .await
                    .map(|outcome| (request_id, outcome))
            })
            .buffer_unordered(self.config.concurrent_uploads.max(1))
            .collect()
            .await;
        outcomes.into_iter().collect()
    }

    /// Drive one request until it completes, fails, is aborted or cancelled.
    pub async fn drive(
        &self,
        uploader: &dyn Uploader,
        request: UploadRequest,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> StoreResult<RequestOutcome> {
        let Some(lease) = self.try_claim(&request.request_id).await? else {
            return match self.store.get_upload_request(&request.request_id).await {
                Ok(_) => {
                    debug!(request_id = %request.request_id, "request claimed by another driver");
                    Ok(RequestOutcome::Skipped)
                }
                Err(StoreError::NotFound { .. }) => Ok(RequestOutcome::Aborted),
                Err(err) => Err(err),
            };
        };

        let outcome = self
            .drive_claimed(uploader, &request.request_id, cancel, progress)
            .await;
        lease.release().await;
        outcome
    }

    async fn drive_claimed(
        &self,
        uploader: &dyn Uploader,
        request_id: &str,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> StoreResult<RequestOutcome> {
        // The caller's copy may be stale; the store holds the checkpoint.
        let mut current = match self.store.get_upload_request(request_id).await {
            Ok(current) => current,
            Err(StoreError::NotFound { .. }) => return Ok(RequestOutcome::Aborted),
            Err(err) => return Err(err),
        };
        if current.status == RequestStatus::Completed {
            return Ok(RequestOutcome::AlreadyCompleted);
        }

        info!(
            request_id = %current.request_id,
            resource_id = %current.resource_id,
            next_part = current.next_part,
            bytes_uploaded = current.bytes_uploaded,
            file_size = current.file_size,
            "driving upload request"
        );

        let mut results = uploader.upload(current.clone());
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(
                        request_id = %current.request_id,
                        next_part = current.next_part,
                        "upload interrupted"
                    );
                    return Ok(RequestOutcome::Interrupted);
                }
                next = results.next() => next,
            };

            let now = Utc::now();
            let (updated, failure) = match next {
                Some(result) if result.request_id() != current.request_id => {
                    warn!(
                        request_id = %current.request_id,
                        reported = %result.request_id(),
                        "ignoring result for another request"
                    );
                    continue;
                }
                Some(result) => match apply_result(&current, &result, now) {
                    Ok(updated) => (updated, None),
                    Err(error) => (mark_failed(&current, &error, now), Some(error)),
                },
                None => {
                    let error = UploadError::transient("uploader stopped before completion");
                    (mark_failed(&current, &error, now), Some(error))
                }
            };

            match self.checkpoint(&current, &updated).await? {
                Checkpoint::Persisted => {}
                Checkpoint::Gone => {
                    info!(request_id = %current.request_id, "upload request deleted mid-upload");
                    return Ok(RequestOutcome::Aborted);
                }
                Checkpoint::Lost => {
                    warn!(
                        request_id = %current.request_id,
                        "upload lease taken over by another driver, stopping"
                    );
                    return Ok(RequestOutcome::Skipped);
                }
            }
            current = updated;

            if let Some(error) = failure {
                warn!(
                    request_id = %current.request_id,
                    failed_attempts = current.failed_attempts,
                    retryable = current.retryable,
                    error = %error,
                    "upload attempt failed"
                );
                report(
                    progress,
                    SyncState::Failed {
                        request_id: current.request_id.clone(),
                        error: error.clone(),
                    },
                );
                return Ok(RequestOutcome::Failed(error));
            }

            report(
                progress,
                SyncState::InProgress {
                    request_id: current.request_id.clone(),
                    bytes_uploaded: current.bytes_uploaded,
                    file_size: current.file_size,
                },
            );

            if current.status == RequestStatus::Completed {
                info!(
                    request_id = %current.request_id,
                    file_size = current.file_size,
                    "upload completed"
                );
                if self.config.remove_uploaded_files {
                    remove_local_file(&current.file_path).await;
                }
                return Ok(RequestOutcome::Completed);
            }

            // Deleted between parts: stop before sending another one.
            match self.store.get_upload_request(&current.request_id).await {
                Ok(_) => {}
                Err(StoreError::NotFound { .. }) => {
                    info!(request_id = %current.request_id, "upload request deleted mid-upload");
                    return Ok(RequestOutcome::Aborted);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Persist `updated` under the lease and mirror a status change onto the
    /// resource.
    async fn checkpoint(
        &self,
        previous: &UploadRequest,
        updated: &UploadRequest,
    ) -> StoreResult<Checkpoint> {
        let until = self.lease_until(Utc::now());
        match self
            .store
            .checkpoint_upload_request(updated, &self.owner, until)
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => return Ok(Checkpoint::Gone),
            Err(StoreError::ClaimLost { .. }) => return Ok(Checkpoint::Lost),
            Err(err) => return Err(err),
        }
        if previous.status == updated.status {
            return Ok(Checkpoint::Persisted);
        }

        let status = ResourceStatus::from(updated.status);
        let mut resource = match self.store.get_resource(&updated.resource_id).await {
            Ok(resource) => resource,
            Err(StoreError::NotFound { .. }) => return Ok(Checkpoint::Gone),
            Err(err) => return Err(err),
        };
        if resource.status != status {
            resource.status = status;
            match self.store.update_resource(&resource).await {
                Ok(()) => {}
                Err(StoreError::NotFound { .. }) => return Ok(Checkpoint::Gone),
                Err(err) => return Err(err),
            }
        }
        Ok(Checkpoint::Persisted)
    }
}

fn report(progress: Option<&ProgressSender>, state: SyncState) {
    if let Some(sender) = progress {
        // A dropped receiver just means nobody is listening.
        let _ = sender.send(state);
    }
}

async fn remove_local_file(path: &str) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("removed uploaded file {}", path),
        Err(err) => warn!("failed to remove uploaded file {}: {}", path, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Capture, CaptureType, Resource};
    use crate::services::{deriver::derive_upload_request, record_store::SqliteRecordStore};
    use futures::stream::BoxStream;
    use serde_json::json;

    fn resource(file_size: i64) -> Resource {
        Resource::new(
            "c1",
            CaptureType::Audio,
            "wav",
            "/tmp/a.wav",
            file_size,
            "https://x/a",
        )
    }

    fn request(file_size: i64) -> UploadRequest {
        derive_upload_request(&resource(file_size))
    }

    fn started(request_id: &str) -> UploadResult {
        UploadResult::Started {
            request_id: request_id.into(),
            upload_id: "u-1".into(),
            started_at: Utc::now(),
        }
    }

    fn part(request_id: &str, part_number: u32, bytes: i64) -> UploadResult {
        UploadResult::Success {
            request_id: request_id.into(),
            part_number,
            bytes_uploaded: bytes,
            uploaded_at: Utc::now(),
        }
    }

    fn completed(request_id: &str) -> UploadResult {
        UploadResult::Completed {
            request_id: request_id.into(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_parts_advance_checkpoint_and_status() {
        let now = Utc::now();
        let req = request(300);
        let id = req.request_id.clone();

        let req = apply_result(&req, &started(&id), now).unwrap();
        assert_eq!(req.status, RequestStatus::Started);
        assert_eq!(req.upload_id.as_deref(), Some("u-1"));

        let req = apply_result(&req, &part(&id, 1, 100), now).unwrap();
        assert_eq!(req.status, RequestStatus::Started);
        assert_eq!((req.bytes_uploaded, req.next_part), (100, 2));

        let req = apply_result(&req, &part(&id, 2, 100), now).unwrap();
        assert_eq!(req.status, RequestStatus::Uploading);

        let req = apply_result(&req, &part(&id, 3, 100), now).unwrap();
        let req = apply_result(&req, &completed(&id), now).unwrap();
        assert_eq!(req.status, RequestStatus::Completed);
        assert_eq!((req.bytes_uploaded, req.next_part), (300, 4));
    }

    #[test]
    fn test_protocol_violations_are_fatal() {
        let now = Utc::now();
        let req = request(300);
        let id = req.request_id.clone();
        let req = apply_result(&req, &started(&id), now).unwrap();

        let out_of_order = apply_result(&req, &part(&id, 2, 100), now).unwrap_err();
        assert!(!out_of_order.is_transient());

        let overflow = apply_result(&req, &part(&id, 1, 301), now).unwrap_err();
        assert!(!overflow.is_transient());

        let early = apply_result(&req, &completed(&id), now).unwrap_err();
        assert!(!early.is_transient());
    }

    #[test]
    fn test_failure_keeps_checkpoint() {
        let now = Utc::now();
        let mut req = request(300);
        req.upload_id = Some("u-1".into());
        req.bytes_uploaded = 100;
        req.next_part = 2;
        req.status = RequestStatus::Started;

        let error = UploadError::transient("timeout");
        let result = UploadResult::Failure {
            request_id: req.request_id.clone(),
            error: error.clone(),
        };
        assert_eq!(apply_result(&req, &result, now), Err(error.clone()));

        let failed = mark_failed(&req, &error, now);
        assert_eq!(failed.status, RequestStatus::Failed);
        assert_eq!(failed.failed_attempts, 1);
        assert_eq!((failed.bytes_uploaded, failed.next_part), (100, 2));
        assert!(failed.retryable);
        assert_eq!(failed.last_error.as_deref(), Some("transient upload error: timeout"));

        let fatal = mark_failed(&failed, &UploadError::fatal("forbidden"), now);
        assert_eq!(fatal.failed_attempts, 2);
        assert!(!fatal.retryable);
    }

    #[test]
    fn test_report_groups_outcomes() {
        let mut report = SyncReport::default();
        report.record("a".into(), &RequestOutcome::Completed);
        report.record("b".into(), &RequestOutcome::Failed(UploadError::fatal("x")));
        report.record("c".into(), &RequestOutcome::Skipped);
        report.record("d".into(), &RequestOutcome::Interrupted);
        assert_eq!(report.completed, vec!["a"]);
        assert_eq!(report.failed, vec!["b"]);
        assert_eq!(report.skipped, vec!["c"]);
        assert!(report.interrupted);
        assert_eq!(report.processed(), 3);
    }

    /// Replays a fixed script of results.
    struct Scripted(Vec<UploadResult>);

    impl Uploader for Scripted {
        fn upload(&self, _request: UploadRequest) -> BoxStream<'_, UploadResult> {
            stream::iter(self.0.clone()).boxed()
        }
    }

    async fn seeded_store(file_size: i64) -> (Arc<SqliteRecordStore>, UploadRequest) {
        let store = Arc::new(SqliteRecordStore::open_in_memory().await.unwrap());
        let mut capture = Capture::new("p1", CaptureType::Audio, "c1-folder", json!({}));
        capture.capture_id = "c1".into();
        store.add_capture(&capture).await.unwrap();
        let resource = resource(file_size);
        let request = derive_upload_request(&resource);
        store.add_resource_with_request(&resource, &request).await.unwrap();
        (store, request)
    }

    #[tokio::test]
    async fn test_drive_persists_every_step_and_mirrors_resource() {
        let (store, request) = seeded_store(200).await;
        let id = request.request_id.clone();
        let driver = UploadDriver::new(store.clone(), SyncConfig::default());
        let uploader = Scripted(vec![
            started(&id),
            part(&id, 1, 100),
            part(&id, 2, 100),
            completed(&id),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = driver
            .drive(&uploader, request.clone(), &CancellationToken::new(), Some(&tx))
            .await
            .unwrap();
        assert_eq!(outcome, RequestOutcome::Completed);

        let stored = store.get_upload_request(&id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
        assert_eq!((stored.bytes_uploaded, stored.next_part), (200, 3));
        let resource = store.get_resource(&request.resource_id).await.unwrap();
        assert_eq!(resource.status, ResourceStatus::Completed);
        assert!(!driver.is_claimed(&id).await.unwrap());

        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_short_stream_is_recorded_as_transient_failure() {
        let (store, request) = seeded_store(200).await;
        let id = request.request_id.clone();
        let driver = UploadDriver::new(store.clone(), SyncConfig::default());
        let uploader = Scripted(vec![started(&id), part(&id, 1, 100)]);

        let outcome = driver
            .drive(&uploader, request, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert!(matches!(outcome, RequestOutcome::Failed(UploadError::Transient(_))));

        let stored = store.get_upload_request(&id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Failed);
        assert_eq!((stored.bytes_uploaded, stored.next_part), (100, 2));
        assert!(stored.retryable);
    }

    #[tokio::test]
    async fn test_completed_request_is_a_no_op() {
        let (store, request) = seeded_store(0).await;
        let mut done = request.clone();
        done.status = RequestStatus::Completed;
        store.update_upload_request(&done).await.unwrap();

        let driver = UploadDriver::new(store, SyncConfig::default());
        let outcome = driver
            .drive(&Scripted(vec![]), request, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome, RequestOutcome::AlreadyCompleted);
    }

    #[tokio::test]
    async fn test_request_leased_elsewhere_is_skipped() {
        let (store, request) = seeded_store(100).await;
        let other = UploadDriver::new(store.clone(), SyncConfig::default());
        let _held = other.try_claim(&request.request_id).await.unwrap().unwrap();

        let driver = UploadDriver::new(store.clone(), SyncConfig::default());
        assert!(driver.is_claimed(&request.request_id).await.unwrap());
        let outcome = driver
            .drive(&Scripted(vec![]), request.clone(), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome, RequestOutcome::Skipped);
        let stored = store.get_upload_request(&request.request_id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let (store, request) = seeded_store(100).await;
        let id = request.request_id.clone();
        let past = Utc::now() - Duration::minutes(10);
        assert!(
            store
                .claim_upload_request(&id, "crashed", past, past + Duration::seconds(1))
                .await
                .unwrap()
        );

        let driver = UploadDriver::new(store.clone(), SyncConfig::default());
        let uploader = Scripted(vec![started(&id), part(&id, 1, 100), completed(&id)]);
        let outcome = driver
            .drive(&uploader, request, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome, RequestOutcome::Completed);
        assert!(!driver.is_claimed(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_drive_releases_its_lease() {
        let (store, request) = seeded_store(100).await;
        let driver = UploadDriver::new(store.clone(), SyncConfig::default());
        let lease = driver.try_claim(&request.request_id).await.unwrap().unwrap();
        drop(lease);

        // The release runs on a spawned task.
        for _ in 0..50 {
            if !driver.is_claimed(&request.request_id).await.unwrap() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("lease was never released");
    }

    #[tokio::test]
    async fn test_cancelled_batch_starts_nothing() {
        let (store, request) = seeded_store(100).await;
        let driver = UploadDriver::new(store.clone(), SyncConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = driver
            .drive_batch(&Scripted(vec![]), vec![request.clone()], &cancel, None)
            .await
            .unwrap();
        assert!(outcomes.is_empty());
        let stored = store.get_upload_request(&request.request_id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }
}
