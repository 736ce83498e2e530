use facegate_common::utils::current_timestamp_ms;
use facegate_tracker::camera::{CameraFrame, FrameSource, FrameStream};
use facegate_tracker::{Result, TrackerError};
use std::sync::Arc;

use crate::scene::Scene;

const SCHEME: &str = "sim://";

/// Frame source for `sim://` descriptors, rendering frames from the scene.
pub struct SimulatedSource {
    scene: Arc<Scene>,
}

impl SimulatedSource {
    pub fn new(scene: Arc<Scene>) -> Self {
        Self { scene }
    }
}

impl FrameSource for SimulatedSource {
    fn open(&self, camera_id: u32, descriptor: &str) -> Result<Box<dyn FrameStream>> {
        if !descriptor.starts_with(SCHEME) {
            return Err(TrackerError::CameraError(format!(
                "simulator cannot open source {}",
                descriptor
            )));
        }
        if self.scene.camera(camera_id).is_none() {
            return Err(TrackerError::CameraError(format!(
                "camera {} is not part of the scene",
                camera_id
            )));
        }

        Ok(Box::new(SimulatedStream {
            camera_id,
            scene: Arc::clone(&self.scene),
        }))
    }
}

struct SimulatedStream {
    camera_id: u32,
    scene: Arc<Scene>,
}

impl FrameStream for SimulatedStream {
    fn read(&mut self) -> Option<CameraFrame> {
        let (sequence_num, image) = self.scene.capture(self.camera_id)?;
        Some(CameraFrame {
            camera_id: self.camera_id,
            image,
            timestamp_ms: current_timestamp_ms(),
            sequence_num,
        })
    }
}
