//! Core data models for the capture upload engine.
//!
//! These records describe what was captured on the device and how far each
//! artifact has travelled towards the remote object store. They map to
//! SQLite rows via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod capture;
pub mod resource;
pub mod upload_request;
pub mod upload_result;

pub use capture::{Capture, CaptureType};
pub use resource::{Resource, ResourceStatus};
pub use upload_request::{RequestStatus, UploadRequest};
pub use upload_result::{UploadError, UploadResult};
