//! Turns a freshly registered resource into its initial upload request.

use crate::models::{RequestStatus, Resource, UploadRequest};
use chrono::Utc;
use uuid::Uuid;

/// Build the initial upload request for `resource`.
///
/// Pure apart from the generated `request_id` and timestamp: nothing is
/// persisted. The engine calls this exactly once per resource; persisting a
/// second derivation for the same resource is rejected by the record store.
pub fn derive_upload_request(resource: &Resource) -> UploadRequest {
    UploadRequest {
        request_id: Uuid::new_v4().to_string(),
        resource_id: resource.resource_id.clone(),
        upload_url: resource.upload_url.clone(),
        file_path: resource.file_path.clone(),
        file_size: resource.file_size,
        bytes_uploaded: 0,
        next_part: 1,
        upload_id: None,
        status: RequestStatus::Pending,
        failed_attempts: 0,
        last_error: None,
        retryable: true,
        last_updated_time: Utc::now(),
    }
}
