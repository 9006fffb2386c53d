//! Represents a resource: one artifact produced within a capture.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::capture::CaptureType;
use super::upload_request::RequestStatus;

/// Upload status of a resource as seen by callers.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl From<RequestStatus> for ResourceStatus {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::Pending => Self::Pending,
            RequestStatus::Started | RequestStatus::Uploading => Self::Uploading,
            RequestStatus::Completed => Self::Completed,
            RequestStatus::Failed => Self::Failed,
        }
    }
}

/// One file or structured payload captured during a session.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Resource {
    /// Unique identifier for this resource.
    pub resource_id: String,

    /// Owning capture.
    pub capture_id: String,

    /// Sensor session kind, copied from the capture.
    pub capture_type: CaptureType,

    /// File extension or payload format (e.g. "jpg", "wav", "zip").
    pub file_type: String,

    /// Local path of the finalized artifact.
    pub file_path: String,

    /// Size in bytes of the artifact at `file_path`.
    pub file_size: i64,

    /// Target location in the remote store. Fixed once any bytes are uploaded.
    pub upload_url: String,

    /// Mirrors the status of the resource's upload request.
    pub status: ResourceStatus,
}

impl Resource {
    /// Build a pending resource with a freshly generated id.
    pub fn new(
        capture_id: impl Into<String>,
        capture_type: CaptureType,
        file_type: impl Into<String>,
        file_path: impl Into<String>,
        file_size: i64,
        upload_url: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: Uuid::new_v4().to_string(),
            capture_id: capture_id.into(),
            capture_type,
            file_type: file_type.into(),
            file_path: file_path.into(),
            file_size,
            upload_url: upload_url.into(),
            status: ResourceStatus::Pending,
        }
    }
}
