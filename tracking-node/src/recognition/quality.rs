use facegate_common::BBox;

use crate::inference::{DetectedFace, HeadPose};

const SIZE_WEIGHT: f32 = 0.3;
const POSITION_WEIGHT: f32 = 0.2;
const DETECTION_WEIGHT: f32 = 0.2;
const BRIGHTNESS_WEIGHT: f32 = 0.1;
const SHARPNESS_WEIGHT: f32 = 0.1;
const ANGLE_WEIGHT: f32 = 0.1;

const MIN_FACE_PX: f32 = 50.0;
const MAX_FRAME_COVERAGE: f32 = 0.8;
/// Face area at which the size score saturates.
const FULL_SIZE_AREA: f32 = 10_000.0;

/// Composite score that filters faces too small, too off-center or too
/// oblique to be worth resolving.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    threshold: f32,
}

impl QualityGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn accepts(&self, face: &DetectedFace, frame_width: u32, frame_height: u32) -> bool {
        self.score(face, frame_width, frame_height) >= self.threshold
    }

    pub fn score(&self, face: &DetectedFace, frame_width: u32, frame_height: u32) -> f32 {
        SIZE_WEIGHT * size_score(&face.bbox, frame_width, frame_height)
            + POSITION_WEIGHT * position_score(&face.bbox, frame_width, frame_height)
            + DETECTION_WEIGHT * face.det_score.clamp(0.0, 1.0)
            + BRIGHTNESS_WEIGHT * brightness_score(face.landmarks.as_deref())
            + SHARPNESS_WEIGHT * sharpness_score(&face.embedding)
            + ANGLE_WEIGHT * angle_score(face.pose.as_ref())
    }
}

fn size_score(bbox: &BBox, frame_width: u32, frame_height: u32) -> f32 {
    let (width, height) = (bbox.width(), bbox.height());
    if width < MIN_FACE_PX || height < MIN_FACE_PX {
        return 0.0;
    }
    if width > frame_width as f32 * MAX_FRAME_COVERAGE || height > frame_height as f32 * MAX_FRAME_COVERAGE {
        return 0.0;
    }
    (bbox.area() / FULL_SIZE_AREA).min(1.0)
}

fn position_score(bbox: &BBox, frame_width: u32, frame_height: u32) -> f32 {
    let (cx, cy) = (frame_width as f32 / 2.0, frame_height as f32 / 2.0);
    let (fx, fy) = bbox.center();
    let max_distance = (cx * cx + cy * cy).sqrt();
    if max_distance <= 0.0 {
        return 0.0;
    }
    let distance = ((fx - cx).powi(2) + (fy - cy).powi(2)).sqrt();
    (1.0 - distance / max_distance).max(0.0)
}

fn brightness_score(landmarks: Option<&[[f32; 2]]>) -> f32 {
    match landmarks {
        Some(points) if !points.is_empty() => {
            let sum: f32 = points.iter().map(|[x, y]| x + y).sum();
            let average = sum / (points.len() * 2) as f32 / 255.0;
            (1.0 - (average - 0.5).abs() * 2.0).clamp(0.0, 1.0)
        }
        _ => 0.5,
    }
}

fn sharpness_score(embedding: &[f32]) -> f32 {
    if embedding.is_empty() {
        return 0.5;
    }
    let n = embedding.len() as f32;
    let mean = embedding.iter().sum::<f32>() / n;
    let variance = embedding.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (variance / 0.1).min(1.0)
}

fn angle_score(pose: Option<&HeadPose>) -> f32 {
    match pose {
        Some(pose) => (1.0 - (pose.yaw.abs() + pose.pitch.abs() + pose.roll.abs()) / 90.0).max(0.0),
        None => 0.8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(bbox: BBox) -> DetectedFace {
        DetectedFace {
            bbox,
            det_score: 0.99,
            landmarks: None,
            pose: None,
            embedding: (0..16).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect(),
        }
    }

    #[test]
    fn test_centered_face_passes() {
        let gate = QualityGate::new(0.65);
        let centered = face(BBox::new(450.0, 250.0, 550.0, 350.0));
        let score = gate.score(&centered, 1000, 600);
        // 0.3 + 0.2 + 0.198 + 0.05 + 0.1 + 0.08
        assert!((score - 0.928).abs() < 1e-3);
        assert!(gate.accepts(&centered, 1000, 600));
    }

    #[test]
    fn test_tiny_and_oversized_faces_fail() {
        let gate = QualityGate::new(0.65);
        let tiny = face(BBox::new(490.0, 290.0, 520.0, 320.0));
        assert!(!gate.accepts(&tiny, 1000, 600));

        let huge = face(BBox::new(0.0, 0.0, 1000.0, 600.0));
        assert_eq!(size_score(&huge.bbox, 1000, 600), 0.0);
        assert!(!gate.accepts(&huge, 1000, 600));
    }

    #[test]
    fn test_face_too_tall_for_frame_fails() {
        let gate = QualityGate::new(0.65);
        // Covers 42% of the frame area but 83% of its height.
        let tall = face(BBox::new(250.0, 50.0, 750.0, 550.0));
        assert_eq!(size_score(&tall.bbox, 1000, 600), 0.0);
        let score = gate.score(&tall, 1000, 600);
        assert!((score - 0.628).abs() < 1e-3);
        assert!(!gate.accepts(&tall, 1000, 600));

        // The same face fits a taller frame.
        assert_eq!(size_score(&tall.bbox, 1000, 1000), 1.0);
    }

    #[test]
    fn test_pose_penalizes_oblique_faces() {
        let frontal = HeadPose { yaw: 0.0, pitch: 0.0, roll: 0.0 };
        let profile = HeadPose { yaw: 80.0, pitch: 20.0, roll: 0.0 };
        assert_eq!(angle_score(Some(&frontal)), 1.0);
        assert_eq!(angle_score(Some(&profile)), 0.0);
        assert_eq!(angle_score(None), 0.8);
    }
}
