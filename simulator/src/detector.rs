use facegate_common::BBox;
use facegate_tracker::camera::CameraFrame;
use facegate_tracker::inference::{DetectedFace, DetectorFactory, FaceDetector, HeadPose};
use facegate_tracker::Result;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::SimulationSettings;
use crate::scene::Scene;

/// Standard normal sample (Box-Muller).
fn gaussian(rng: &mut impl Rng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Deterministic reference embedding of a person.
pub fn identity_embedding(seed: u64, identity: &str, dim: usize) -> Vec<f32> {
    let salt = identity
        .bytes()
        .fold(1469598103934665603u64, |h, b| (h ^ b as u64).wrapping_mul(1099511628211));
    let mut rng = StdRng::seed_from_u64(seed ^ salt);
    (0..dim).map(|_| gaussian(&mut rng)).collect()
}

#[derive(Debug, Clone)]
struct DetectorProfile {
    noise: f32,
    miss_rate: f32,
    latency: Duration,
}

/// Reports the faces the scene drew into a frame, with a noisy version of
/// each person's reference embedding.
pub struct SimulatedDetector {
    scene: Arc<Scene>,
    references: Arc<HashMap<String, Vec<f32>>>,
    profile: DetectorProfile,
    detection_threshold: f32,
    rng: Mutex<StdRng>,
}

impl FaceDetector for SimulatedDetector {
    fn detect(&self, frame: &CameraFrame) -> Result<Vec<DetectedFace>> {
        if !self.profile.latency.is_zero() {
            std::thread::sleep(self.profile.latency);
        }

        let Some(placements) = self.scene.take_placements(frame.camera_id, frame.sequence_num) else {
            return Ok(Vec::new());
        };
        let Some(camera) = self.scene.camera(frame.camera_id) else {
            return Ok(Vec::new());
        };
        // The pipeline may hand us a downscaled copy.
        let factor = frame.width() as f32 / camera.width as f32;

        let mut rng = self.rng.lock();
        let mut faces = Vec::with_capacity(placements.len());
        for placement in placements {
            let Some(reference) = self.references.get(&placement.identity) else {
                continue;
            };
            if rng.gen::<f32>() < self.profile.miss_rate {
                debug!(identity = %placement.identity, "Simulated miss");
                continue;
            }
            let det_score = rng.gen_range(0.9..0.999);
            if det_score < self.detection_threshold {
                continue;
            }

            let half = placement.size / 2.0;
            let (cx, cy) = placement.center;
            let embedding = reference
                .iter()
                .map(|v| v + self.profile.noise * gaussian(&mut *rng))
                .collect();

            faces.push(DetectedFace {
                bbox: BBox::new(
                    (cx - half) * factor,
                    (cy - half) * factor,
                    (cx + half) * factor,
                    (cy + half) * factor,
                ),
                det_score,
                landmarks: None,
                pose: Some(HeadPose {
                    yaw: 5.0 * gaussian(&mut *rng),
                    pitch: 3.0 * gaussian(&mut *rng),
                    roll: 2.0 * gaussian(&mut *rng),
                }),
                embedding,
            });
        }
        Ok(faces)
    }
}

pub struct SimulatedDetectorFactory {
    scene: Arc<Scene>,
    references: Arc<HashMap<String, Vec<f32>>>,
    profile: DetectorProfile,
    seed: u64,
}

impl SimulatedDetectorFactory {
    pub fn new(scene: Arc<Scene>, settings: &SimulationSettings) -> Self {
        let references = settings
            .people
            .iter()
            .map(|p| {
                let reference = identity_embedding(settings.seed, &p.identity, settings.embedding_dim);
                (p.identity.clone(), reference)
            })
            .collect();

        Self {
            scene,
            references: Arc::new(references),
            profile: DetectorProfile {
                noise: settings.embedding_noise,
                miss_rate: settings.miss_rate,
                latency: Duration::from_millis(settings.detector_latency_ms),
            },
            seed: settings.seed,
        }
    }
}

impl DetectorFactory for SimulatedDetectorFactory {
    fn create(&self, gpu_id: u32, detection_threshold: f32) -> Result<Arc<dyn FaceDetector>> {
        Ok(Arc::new(SimulatedDetector {
            scene: Arc::clone(&self.scene),
            references: Arc::clone(&self.references),
            profile: self.profile.clone(),
            detection_threshold,
            rng: Mutex::new(StdRng::seed_from_u64(self.seed.wrapping_add(gpu_id as u64))),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersonConfig;
    use facegate_common::{CameraConfig, Tripwire, TripwireOrientation};
    use image::RgbImage;

    fn settings() -> SimulationSettings {
        SimulationSettings {
            duration_secs: 1,
            seed: 42,
            embedding_dim: 64,
            embedding_noise: 0.2,
            miss_rate: 0.0,
            detector_latency_ms: 0,
            walk_speed: 0.25,
            pause_secs: 1.0,
            face_size_px: 120.0,
            cameras: vec![CameraConfig {
                id: 0,
                name: "Lobby".to_string(),
                source: "sim://lobby".to_string(),
                width: 1280,
                height: 720,
                fps: 10,
                gpu_id: 0,
                enabled: true,
                tripwires: vec![Tripwire {
                    name: "Entrance".to_string(),
                    direction: TripwireOrientation::Vertical,
                    position: 0.5,
                    spacing: 0.1,
                }],
            }],
            people: vec![
                PersonConfig { identity: "E1".to_string(), name: "Ada".to_string(), camera_id: 0 },
                PersonConfig { identity: "E2".to_string(), name: "Grace".to_string(), camera_id: 0 },
            ],
            settings: HashMap::new(),
        }
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb)
    }

    #[test]
    fn test_reference_embeddings_are_stable_and_distinct() {
        let a = identity_embedding(42, "E1", 64);
        assert_eq!(a, identity_embedding(42, "E1", 64));
        assert!(cosine(&a, &identity_embedding(42, "E2", 64)) < 0.6);
    }

    #[test]
    fn test_boxes_follow_downscaled_frame() {
        let settings = settings();
        let scene = Arc::new(Scene::new(&settings));
        let factory = SimulatedDetectorFactory::new(Arc::clone(&scene), &settings);
        let detector = factory.create(0, 0.5).unwrap();

        let (seq, _) = scene.capture(0).unwrap();
        let frame = CameraFrame {
            camera_id: 0,
            image: RgbImage::new(640, 360),
            timestamp_ms: 0,
            sequence_num: seq,
        };
        let faces = detector.detect(&frame).unwrap();

        assert_eq!(faces.len(), 2);
        assert!((faces[0].bbox.width() - 60.0).abs() < 1e-3);
        let reference = identity_embedding(42, "E1", 64);
        assert!(cosine(&faces[0].embedding, &reference) > 0.9);

        // Placements are consumed by the first detection.
        assert!(detector.detect(&frame).unwrap().is_empty());
    }
}
