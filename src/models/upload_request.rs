//! Represents the persisted state of one resumable multipart upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle of an upload request.
///
/// `Pending → Started → Uploading → Completed`, with `Failed` reachable from
/// any non-terminal state. A failed request that is still retryable is picked
/// up again by the next sync pass and resumes from its checkpoint.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Started,
    Uploading,
    Completed,
    Failed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 5] = [
        RequestStatus::Pending,
        RequestStatus::Started,
        RequestStatus::Uploading,
        RequestStatus::Completed,
        RequestStatus::Failed,
    ];

    /// Statuses a sync pass always picks up.
    pub const IN_FLIGHT: [RequestStatus; 3] = [
        RequestStatus::Pending,
        RequestStatus::Started,
        RequestStatus::Uploading,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Uploading => "UPLOADING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown upload request status `{0}`")]
pub struct UnknownStatus(pub String);

/// Case-insensitive, so `?status=completed` works.
impl FromStr for RequestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A multipart upload attempt for exactly one resource.
///
/// `next_part` and `bytes_uploaded` form the checkpoint: they only advance
/// after a part is acknowledged by the remote store and persisted, so a
/// restarted sync resumes at `next_part` without re-sending earlier parts.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct UploadRequest {
    /// Unique identifier for this request.
    pub request_id: String,

    /// The resource being uploaded. At most one request per resource.
    pub resource_id: String,

    /// Remote target, copied from the resource.
    pub upload_url: String,

    /// Local file to read parts from, copied from the resource.
    pub file_path: String,

    /// Total size in bytes of the file.
    pub file_size: i64,

    /// Sum of the sizes of all acknowledged parts.
    pub bytes_uploaded: i64,

    /// Next 1-based part number to send.
    pub next_part: u32,

    /// Multipart session id issued by the remote store on start.
    pub upload_id: Option<String>,

    pub status: RequestStatus,

    /// Consecutive failed attempts since the last acknowledged progress.
    pub failed_attempts: u32,

    /// Message of the most recent failure.
    pub last_error: Option<String>,

    /// False once the remote store rejected the upload permanently.
    pub retryable: bool,

    /// Time of creation, last acknowledged part, completion or failure.
    pub last_updated_time: DateTime<Utc>,
}

impl UploadRequest {
    pub fn remaining_bytes(&self) -> i64 {
        (self.file_size - self.bytes_uploaded).max(0)
    }

    /// Whether a sync pass should pick this request up.
    pub fn is_eligible(&self, max_failed_attempts: u32) -> bool {
        match self.status {
            RequestStatus::Pending | RequestStatus::Started | RequestStatus::Uploading => true,
            RequestStatus::Failed => self.retryable && self.failed_attempts < max_failed_attempts,
            RequestStatus::Completed => false,
        }
    }
}
