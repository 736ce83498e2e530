use crossbeam::channel::{Receiver, Sender, TrySendError};
use facegate_common::{CameraConfig, TrackingSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{CameraFrame, FrameSource, FrameStream};
use crate::error::Result;
use crate::inference::DetectionResult;
use crate::processing::FrameProcessor;
use crate::utils::{metrics::Metrics, pool::ResourcePools, shutdown::ShutdownSignal};

/// Latest raw frame and tracking snapshot of one camera. Each slot has its
/// own lock so display readers never contend with another camera.
#[derive(Default)]
pub struct CameraSlots {
    raw: Mutex<Option<Arc<CameraFrame>>>,
    snapshot: Mutex<Option<TrackingSnapshot>>,
}

impl CameraSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_frame(&self, frame: Arc<CameraFrame>) {
        *self.raw.lock() = Some(frame);
    }

    pub fn latest_frame(&self) -> Option<Arc<CameraFrame>> {
        self.raw.lock().clone()
    }

    pub fn set_snapshot(&self, snapshot: TrackingSnapshot) {
        *self.snapshot.lock() = Some(snapshot);
    }

    pub fn latest_snapshot(&self) -> Option<TrackingSnapshot> {
        self.snapshot.lock().clone()
    }
}

/// Collaborators shared by every camera's capture loop.
pub struct CaptureContext {
    pub source: Arc<dyn FrameSource>,
    pub processor: Arc<FrameProcessor>,
    pub pools: Arc<ResourcePools>,
    pub metrics: Arc<Metrics>,
    pub frame_interval: Duration,
    pub reconnect_delay: Duration,
}

/// Per-camera loop: keeps the video source open, publishes frames to the
/// display slot and the detection queue, and folds completed detection
/// results into the tracking snapshot.
pub struct CaptureLoop {
    camera: CameraConfig,
    context: Arc<CaptureContext>,
    slots: Arc<CameraSlots>,
    frames: Sender<CameraFrame>,
    results: Receiver<DetectionResult>,
    shutdown: ShutdownSignal,
}

impl CaptureLoop {
    pub fn new(
        camera: CameraConfig,
        context: Arc<CaptureContext>,
        slots: Arc<CameraSlots>,
        frames: Sender<CameraFrame>,
        results: Receiver<DetectionResult>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            camera,
            context,
            slots,
            frames,
            results,
            shutdown,
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        Ok(thread::Builder::new()
            .name(format!("capture-{}", self.camera.id))
            .spawn(move || self.run())?)
    }

    /// Runs until the camera's shutdown signal fires. Open and read
    /// failures never end the loop.
    pub fn run(self) {
        let camera_id = self.camera.id;
        info!(camera_id, name = %self.camera.name, "Capture loop started");
        let mut stream: Option<Box<dyn FrameStream>> = None;

        while !self.shutdown.is_triggered() {
            if stream.is_none() {
                match self.context.source.open(camera_id, &self.camera.source) {
                    Ok(opened) => {
                        info!(camera_id, source = %self.camera.source, "Video source opened");
                        stream = Some(opened);
                    }
                    Err(e) => {
                        error!(camera_id, "Failed to open video source: {}", e);
                        if self.shutdown.wait_timeout(self.context.reconnect_delay) {
                            break;
                        }
                        continue;
                    }
                }
            }
            let Some(active) = stream.as_mut() else { continue };

            let started = Instant::now();
            match active.read() {
                Some(frame) => self.handle_frame(frame),
                None => {
                    warn!(camera_id, "Frame read failed, reopening source");
                    if let Some(mut failed) = stream.take() {
                        failed.close();
                    }
                }
            }

            let remaining = self.context.frame_interval.saturating_sub(started.elapsed());
            if !remaining.is_zero() && self.shutdown.wait_timeout(remaining) {
                break;
            }
        }

        if let Some(mut open) = stream {
            open.close();
        }
        info!(camera_id, "Capture loop stopped");
    }

    fn handle_frame(&self, frame: CameraFrame) {
        let camera_id = self.camera.id;
        self.context.metrics.record_frame_captured(camera_id);

        let mut buffer = self.context.pools.acquire_frame(frame.width(), frame.height());
        buffer.copy_from_slice(frame.image.as_raw());
        let queued = CameraFrame {
            camera_id,
            image: buffer,
            timestamp_ms: frame.timestamp_ms,
            sequence_num: frame.sequence_num,
        };
        self.slots.publish_frame(Arc::new(frame));

        match self.frames.try_send(queued) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                self.context.metrics.record_frame_dropped(camera_id, "frame");
                self.context.pools.release_frame(dropped.image);
            }
            Err(TrySendError::Disconnected(dropped)) => {
                debug!(camera_id, "Detection queue closed");
                self.context.pools.release_frame(dropped.image);
            }
        }

        let snapshot = match self.results.try_recv() {
            Ok(result) => self.context.processor.process(&self.camera, &result),
            Err(_) => TrackingSnapshot::default(),
        };
        self.slots.set_snapshot(snapshot);
    }
}
