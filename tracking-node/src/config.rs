use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};

use crate::{
    error::{Result, TrackerError},
    tracking::rules::StatusRuleTable,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrackerConfig {
    pub node_id: String,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub attendance_api: AttendanceApiConfig,
    #[serde(default)]
    pub status_rules: StatusRuleTable,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Timing and capacity constants of the engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub frame_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub frame_queue_capacity: usize,
    pub result_queue_capacity: usize,
    pub detector_timeout_ms: u64,
    pub max_detection_width: u32,
    pub detection_workers_per_gpu: usize,
    pub clahe_clip_limit: f32,
    pub clahe_tiles: u32,
    pub blur_sigma: f32,
    pub camera_join_timeout_ms: u64,
    pub worker_join_timeout_ms: u64,
    pub identity_timeout_secs: u64,
    pub eviction_interval_secs: u64,
    pub embedding_history_size: usize,
    pub cache_capacity: usize,
    pub search_top_k: usize,
    pub vote_window: usize,
    pub vote_min_votes: usize,
    pub vote_reset_ms: u64,
    pub confident_update_score: f32,
    pub update_queue_capacity: usize,
    pub update_batch_size: usize,
    pub update_poll_ms: u64,
    pub batch_flush_secs: u64,
    pub idle_flush_secs: u64,
    pub frame_pool_capacity: usize,
    pub embedding_pool_capacity: usize,
    pub embedding_dim: usize,
}

impl PipelineConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }

    pub fn camera_join_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_join_timeout_ms)
    }

    pub fn worker_join_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_join_timeout_ms)
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_secs(self.identity_timeout_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn vote_reset(&self) -> Duration {
        Duration::from_millis(self.vote_reset_ms)
    }

    pub fn update_poll(&self) -> Duration {
        Duration::from_millis(self.update_poll_ms)
    }

    pub fn batch_flush(&self) -> Duration {
        Duration::from_secs(self.batch_flush_secs)
    }

    pub fn idle_flush(&self) -> Duration {
        Duration::from_secs(self.idle_flush_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AttendanceApiConfig {
    pub enabled: bool,
    pub base_url: String,
    pub attendance_endpoint: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub access_token: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub refresh_margin_secs: u64,
}

impl AttendanceApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn attendance_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.attendance_endpoint)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// A single value of the store's key/value settings table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum SettingValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Integer(v) => Some(*v as f64),
            SettingValue::Float(v) => Some(*v),
            SettingValue::Text(v) => v.trim().parse().ok(),
        }
    }
}

/// Immutable snapshot of the recognition tuning parameters. Built once from
/// the store's settings and shared behind an `Arc`; a configuration change
/// replaces the whole snapshot.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TuningSettings {
    pub recognition_threshold: f32,
    pub detection_threshold: f32,
    pub face_quality_threshold: f32,
    pub embedding_update_cooldown: Duration,
    pub max_updates_before_rebuild: usize,
    pub kalman_process_noise: f32,
    pub kalman_measurement_noise: f32,
}

impl TuningSettings {
    pub fn from_settings(settings: &HashMap<String, SettingValue>) -> Result<Self> {
        if settings.is_empty() {
            return Err(TrackerError::StartupError(
                "system tuning settings are missing from the store".to_string(),
            ));
        }

        let defaults = Self::default();
        let read = |key: &str, default: f64| -> f64 {
            settings
                .get(key)
                .and_then(SettingValue::as_f64)
                .unwrap_or(default)
        };

        Ok(Self {
            recognition_threshold: read("recognition_threshold", defaults.recognition_threshold as f64) as f32,
            detection_threshold: read("detection_threshold", defaults.detection_threshold as f64) as f32,
            face_quality_threshold: read("face_quality_threshold", defaults.face_quality_threshold as f64) as f32,
            embedding_update_cooldown: Duration::from_secs_f64(
                read("embedding_update_cooldown", defaults.embedding_update_cooldown.as_secs_f64()).max(0.0),
            ),
            max_updates_before_rebuild: read(
                "max_updates_before_rebuild",
                defaults.max_updates_before_rebuild as f64,
            )
            .max(1.0) as usize,
            kalman_process_noise: read("kalman_process_noise", defaults.kalman_process_noise as f64) as f32,
            kalman_measurement_noise: read("kalman_measurement_noise", defaults.kalman_measurement_noise as f64) as f32,
        })
    }
}

/// Loads a YAML configuration file layered with `<PREFIX>_*` environment
/// overrides.
pub fn load_config<T: DeserializeOwned>(path: &str, env_prefix: &str) -> Result<T> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix(env_prefix).separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            node_id: "facegate-node-1".to_string(),
            pipeline: PipelineConfig::default(),
            attendance_api: AttendanceApiConfig::default(),
            status_rules: StatusRuleTable::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 100,
            reconnect_delay_ms: 5000,
            frame_queue_capacity: 5,
            result_queue_capacity: 10,
            detector_timeout_ms: 500,
            max_detection_width: 960,
            detection_workers_per_gpu: 4,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            blur_sigma: 0.5,
            camera_join_timeout_ms: 5000,
            worker_join_timeout_ms: 5000,
            identity_timeout_secs: 300,
            eviction_interval_secs: 30,
            embedding_history_size: 5,
            cache_capacity: 500,
            search_top_k: 3,
            vote_window: 5,
            vote_min_votes: 3,
            vote_reset_ms: 2000,
            confident_update_score: 0.8,
            update_queue_capacity: 200,
            update_batch_size: 5,
            update_poll_ms: 500,
            batch_flush_secs: 5,
            idle_flush_secs: 2,
            frame_pool_capacity: 64,
            embedding_pool_capacity: 256,
            embedding_dim: 512,
        }
    }
}

impl Default for AttendanceApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://hr.example.com".to_string(),
            attendance_endpoint: "/api/attendance/log".to_string(),
            token_url: "https://accounts.example.com/oauth/v2/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            access_token: String::new(),
            timeout_secs: 10,
            max_retries: 3,
            backoff_ms: 1000,
            refresh_margin_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for TuningSettings {
    fn default() -> Self {
        Self {
            recognition_threshold: 0.6,
            detection_threshold: 0.5,
            face_quality_threshold: 0.65,
            embedding_update_cooldown: Duration::from_secs(60),
            max_updates_before_rebuild: 20,
            kalman_process_noise: 0.1,
            kalman_measurement_noise: 0.1,
        }
    }
}
