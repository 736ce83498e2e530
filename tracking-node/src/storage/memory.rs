use facegate_common::CameraConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use validator::Validate;

use super::{
    AttendanceRecord, EmbeddingKind, LabeledEmbedding, Store, UserRecord, MAX_UPDATE_EMBEDDINGS,
};
use crate::config::SettingValue;
use crate::error::{Result, TrackerError};

#[derive(Debug, Clone)]
struct StoredEmbedding {
    user_id: u64,
    embedding: Vec<f32>,
    kind: EmbeddingKind,
}

#[derive(Default)]
struct Tables {
    cameras: Vec<CameraConfig>,
    settings: HashMap<String, SettingValue>,
    users: Vec<UserRecord>,
    /// Insertion order doubles as creation order.
    embeddings: Vec<StoredEmbedding>,
    attendance: Vec<AttendanceRecord>,
}

/// In-process store used by the simulator and tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_camera(&self, camera: CameraConfig) -> Result<()> {
        camera.validate()?;
        let mut tables = self.tables.write();
        tables.cameras.retain(|c| c.id != camera.id);
        tables.cameras.push(camera);
        Ok(())
    }

    pub fn set_setting(&self, key: &str, value: SettingValue) {
        self.tables.write().settings.insert(key.to_string(), value);
    }

    /// Registers an active user and returns its internal id.
    pub fn add_user(&self, identity: &str, name: &str) -> u64 {
        let mut tables = self.tables.write();
        let user_id = tables.users.len() as u64 + 1;
        tables.users.push(UserRecord {
            user_id,
            identity: identity.to_string(),
            name: name.to_string(),
            active: true,
        });
        user_id
    }

    pub fn set_user_active(&self, identity: &str, active: bool) -> bool {
        let mut tables = self.tables.write();
        match tables.users.iter_mut().find(|u| u.identity == identity) {
            Some(user) => {
                user.active = active;
                true
            }
            None => false,
        }
    }

    pub fn embedding_count(&self, user_id: u64, kind: EmbeddingKind) -> usize {
        self.tables
            .read()
            .embeddings
            .iter()
            .filter(|e| e.user_id == user_id && e.kind == kind)
            .count()
    }

    pub fn attendance(&self) -> Vec<AttendanceRecord> {
        self.tables.read().attendance.clone()
    }
}

impl Store for MemoryStore {
    fn camera_configs(&self) -> Result<Vec<CameraConfig>> {
        Ok(self
            .tables
            .read()
            .cameras
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect())
    }

    fn system_settings(&self) -> Result<HashMap<String, SettingValue>> {
        Ok(self.tables.read().settings.clone())
    }

    fn add_face_embedding(&self, user_id: u64, embedding: &[f32], kind: EmbeddingKind) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.users.iter().any(|u| u.user_id == user_id) {
            return Err(TrackerError::StorageError(format!("unknown user id {}", user_id)));
        }

        if kind == EmbeddingKind::Update {
            let updates = tables
                .embeddings
                .iter()
                .filter(|e| e.user_id == user_id && e.kind == EmbeddingKind::Update)
                .count();
            if updates >= MAX_UPDATE_EMBEDDINGS {
                if let Some(oldest) = tables
                    .embeddings
                    .iter()
                    .position(|e| e.user_id == user_id && e.kind == EmbeddingKind::Update)
                {
                    tables.embeddings.remove(oldest);
                    debug!(user_id, "Dropped oldest update embedding");
                }
            }
        }

        tables.embeddings.push(StoredEmbedding {
            user_id,
            embedding: embedding.to_vec(),
            kind,
        });
        Ok(())
    }

    fn active_embeddings(&self) -> Result<Vec<LabeledEmbedding>> {
        let tables = self.tables.read();
        let active: HashMap<u64, &str> = tables
            .users
            .iter()
            .filter(|u| u.active)
            .map(|u| (u.user_id, u.identity.as_str()))
            .collect();

        Ok(tables
            .embeddings
            .iter()
            .filter_map(|e| {
                active.get(&e.user_id).map(|identity| LabeledEmbedding {
                    identity: identity.to_string(),
                    embedding: e.embedding.clone(),
                })
            })
            .collect())
    }

    fn find_user(&self, identity: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .tables
            .read()
            .users
            .iter()
            .find(|u| u.identity == identity)
            .cloned())
    }

    fn append_attendance(&self, record: AttendanceRecord) -> Result<()> {
        self.tables.write().attendance.push(record);
        Ok(())
    }

    fn attendance_for_user(&self, user_id: u64, limit: usize) -> Result<Vec<AttendanceRecord>> {
        Ok(self
            .tables
            .read()
            .attendance
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FACE_RECOGNITION_SOURCE;
    use chrono::Utc;
    use facegate_common::AttendanceEventType;

    fn camera(id: u32, enabled: bool) -> CameraConfig {
        CameraConfig {
            id,
            name: format!("cam-{}", id),
            source: id.to_string(),
            width: 640,
            height: 480,
            fps: 10,
            gpu_id: 0,
            enabled,
            tripwires: Vec::new(),
        }
    }

    #[test]
    fn test_only_enabled_cameras_are_listed() {
        let store = MemoryStore::new();
        store.add_camera(camera(0, true)).unwrap();
        store.add_camera(camera(1, false)).unwrap();

        let mut invalid = camera(2, true);
        invalid.width = 0;
        assert!(store.add_camera(invalid).is_err());

        let cameras = store.camera_configs().unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].id, 0);
    }

    #[test]
    fn test_update_embeddings_roll_over() {
        let store = MemoryStore::new();
        let user = store.add_user("E1", "Ada");
        store.add_face_embedding(user, &[1.0, 0.0], EmbeddingKind::Enrollment).unwrap();
        for i in 0..25 {
            store.add_face_embedding(user, &[i as f32, 1.0], EmbeddingKind::Update).unwrap();
        }

        assert_eq!(store.embedding_count(user, EmbeddingKind::Update), MAX_UPDATE_EMBEDDINGS);
        assert_eq!(store.embedding_count(user, EmbeddingKind::Enrollment), 1);

        let embeddings = store.active_embeddings().unwrap();
        assert_eq!(embeddings.len(), 21);
        assert_eq!(embeddings[1].embedding, vec![5.0, 1.0]);

        assert!(store.add_face_embedding(99, &[0.0], EmbeddingKind::Update).is_err());
    }

    #[test]
    fn test_inactive_users_are_not_indexed() {
        let store = MemoryStore::new();
        let ada = store.add_user("E1", "Ada");
        let bob = store.add_user("E2", "Bob");
        store.add_face_embedding(ada, &[1.0], EmbeddingKind::Enrollment).unwrap();
        store.add_face_embedding(bob, &[2.0], EmbeddingKind::Enrollment).unwrap();
        assert!(store.set_user_active("E2", false));

        let embeddings = store.active_embeddings().unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].identity, "E1");
    }

    #[test]
    fn test_attendance_most_recent_first() {
        let store = MemoryStore::new();
        let user = store.add_user("E1", "Ada");
        for event_type in [AttendanceEventType::CheckIn, AttendanceEventType::CheckOut] {
            store
                .append_attendance(AttendanceRecord {
                    user_id: user,
                    identity: "E1".to_string(),
                    event_type,
                    camera_id: 0,
                    tripwire: "Entrance".to_string(),
                    timestamp: Utc::now(),
                    source: FACE_RECOGNITION_SOURCE.to_string(),
                })
                .unwrap();
        }

        let records = store.attendance_for_user(user, 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, AttendanceEventType::CheckOut);
        assert!(store.attendance_for_user(42, 10).unwrap().is_empty());
    }
}
