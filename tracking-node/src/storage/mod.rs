use chrono::{DateTime, Utc};
use facegate_common::{AttendanceEventType, CameraConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::SettingValue;
use crate::error::Result;

pub mod memory;

pub use memory::MemoryStore;

/// Rolling limit of update embeddings kept per user.
pub const MAX_UPDATE_EMBEDDINGS: usize = 20;

/// Attendance source tag for rows written by the tracker.
pub const FACE_RECOGNITION_SOURCE: &str = "face_recognition";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Enrollment,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledEmbedding {
    pub identity: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: u64,
    /// Business key, e.g. an employee id.
    pub identity: String,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub user_id: u64,
    pub identity: String,
    pub event_type: AttendanceEventType,
    pub camera_id: u32,
    pub tripwire: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// Authoritative persistent state the tracker reads its configuration from
/// and writes embeddings and attendance to.
pub trait Store: Send + Sync {
    /// Enabled cameras with their tripwires.
    fn camera_configs(&self) -> Result<Vec<CameraConfig>>;

    fn system_settings(&self) -> Result<HashMap<String, SettingValue>>;

    fn add_face_embedding(&self, user_id: u64, embedding: &[f32], kind: EmbeddingKind) -> Result<()>;

    /// Every embedding that belongs to an active user, labelled with the
    /// user's identity key.
    fn active_embeddings(&self) -> Result<Vec<LabeledEmbedding>>;

    fn find_user(&self, identity: &str) -> Result<Option<UserRecord>>;

    fn append_attendance(&self, record: AttendanceRecord) -> Result<()>;

    /// Most recent first.
    fn attendance_for_user(&self, user_id: u64, limit: usize) -> Result<Vec<AttendanceRecord>>;
}
