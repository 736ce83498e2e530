use facegate_common::CameraConfig;
use facegate_tracker::config::SettingValue;
use facegate_tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
    pub simulation: SimulationSettings,
}

/// The synthetic world: cameras, walkers and the detector's behaviour.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimulationSettings {
    #[serde(default = "default_duration")]
    pub duration_secs: u64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Standard deviation of the per-component noise added to a person's
    /// embedding on every detection.
    #[serde(default = "default_noise")]
    pub embedding_noise: f32,
    /// Probability that a visible face is not reported for a frame.
    #[serde(default)]
    pub miss_rate: f32,
    #[serde(default)]
    pub detector_latency_ms: u64,
    /// Walking speed as a fraction of the frame per second.
    #[serde(default = "default_walk_speed")]
    pub walk_speed: f32,
    /// Time a walker idles at either end of its path.
    #[serde(default = "default_pause")]
    pub pause_secs: f32,
    #[serde(default = "default_face_size")]
    pub face_size_px: f32,
    pub cameras: Vec<CameraConfig>,
    pub people: Vec<PersonConfig>,
    #[serde(default)]
    pub settings: HashMap<String, SettingValue>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PersonConfig {
    pub identity: String,
    pub name: String,
    pub camera_id: u32,
}

fn default_duration() -> u64 {
    30
}

fn default_embedding_dim() -> usize {
    128
}

fn default_noise() -> f32 {
    0.3
}

fn default_walk_speed() -> f32 {
    0.25
}

fn default_pause() -> f32 {
    2.0
}

fn default_face_size() -> f32 {
    120.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipped_config_parses() {
        let config: SimulatorConfig =
            serde_yaml::from_str(include_str!("../../config/simulator.yaml")).unwrap();

        assert_eq!(config.simulation.cameras.len(), 2);
        assert!(config.simulation.people.len() >= 2);
        assert!(config.simulation.settings.contains_key("recognition_threshold"));
        assert!(config
            .simulation
            .people
            .iter()
            .all(|p| config.simulation.cameras.iter().any(|c| c.id == p.camera_id)));
        assert_eq!(config.tracker.status_rules.len(), 8);
    }
}
