//! Results reported by an uploader while it drives one request.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why an upload step failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// Network or remote-side hiccup; the request is retried on a later pass.
    #[error("transient upload error: {0}")]
    Transient(String),
    /// The remote store rejected the object for good; never retried automatically.
    #[error("fatal upload error: {0}")]
    Fatal(String),
}

impl UploadError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One step of progress for a single upload request.
///
/// An uploader yields a `Started` when the remote store opens a multipart
/// session, one `Success` per acknowledged part, then `Completed` once the
/// parts are merged. `Failure` ends the sequence for that request.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadResult {
    Started {
        request_id: String,
        upload_id: String,
        started_at: DateTime<Utc>,
    },
    Success {
        request_id: String,
        part_number: u32,
        bytes_uploaded: i64,
        uploaded_at: DateTime<Utc>,
    },
    Completed {
        request_id: String,
        completed_at: DateTime<Utc>,
    },
    Failure {
        request_id: String,
        error: UploadError,
    },
}

impl UploadResult {
    pub fn request_id(&self) -> &str {
        match self {
            Self::Started { request_id, .. }
            | Self::Success { request_id, .. }
            | Self::Completed { request_id, .. }
            | Self::Failure { request_id, .. } => request_id,
        }
    }

    /// Whether no further results follow for this request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failure { .. })
    }
}
