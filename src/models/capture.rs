//! Represents a capture: one data-collection session on the device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of sensor session that produced a capture.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureType {
    Image,
    Video,
    Audio,
    Structured,
    Other,
}

/// A single capture session.
///
/// Captures are written once when the session starts and never mutated
/// afterwards. All resources produced by the session live below
/// `capture_folder` and are deleted together with the capture.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Capture {
    /// Unique identifier for this capture.
    pub capture_id: String,

    /// Participant the capture was taken for.
    pub participant_id: String,

    /// Sensor session kind.
    pub capture_type: CaptureType,

    /// Storage location for every resource of this capture. Unique across captures.
    pub capture_folder: String,

    /// Free-form capture settings, stored as JSON.
    #[sqlx(json)]
    pub settings: serde_json::Value,

    /// When the capture was taken.
    pub captured_at: DateTime<Utc>,
}

impl Capture {
    /// Build a capture with a freshly generated id and the current time.
    pub fn new(
        participant_id: impl Into<String>,
        capture_type: CaptureType,
        capture_folder: impl Into<String>,
        settings: serde_json::Value,
    ) -> Self {
        Self {
            capture_id: Uuid::new_v4().to_string(),
            participant_id: participant_id.into(),
            capture_type,
            capture_folder: capture_folder.into(),
            settings,
            captured_at: Utc::now(),
        }
    }
}
