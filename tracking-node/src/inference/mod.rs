use facegate_common::BBox;
use std::sync::Arc;

use crate::camera::CameraFrame;
use crate::error::Result;

pub mod enhance;
pub mod pipeline;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BBox,
    pub det_score: f32,
    /// Dense 2D landmarks as reported by the detector, if any.
    pub landmarks: Option<Vec<[f32; 2]>>,
    pub pose: Option<HeadPose>,
    pub embedding: Vec<f32>,
}

/// The face-detection and embedding-extraction model. Boxes are returned in
/// the coordinates of the image it was given.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &CameraFrame) -> Result<Vec<DetectedFace>>;
}

/// Builds one detector per GPU.
pub trait DetectorFactory: Send + Sync {
    fn create(&self, gpu_id: u32, detection_threshold: f32) -> Result<Arc<dyn FaceDetector>>;
}

/// Quality-filtered faces for one frame, in source-frame coordinates.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub camera_id: u32,
    pub sequence_num: u64,
    pub timestamp_ms: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub faces: Vec<DetectedFace>,
}
