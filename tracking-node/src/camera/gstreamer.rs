use facegate_common::utils::current_timestamp_ms;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use image::RgbImage;
use tracing::{info, warn};

use super::{CameraFrame, FrameSource, FrameStream};
use crate::error::{Result, TrackerError};

const PULL_TIMEOUT_MS: u64 = 2000;
const SINK_TAIL: &str =
    "videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=1 drop=true";

/// Expands a camera source descriptor into a launch line ending in an
/// RGB `appsink` named `sink`.
pub fn pipeline_description(descriptor: &str) -> String {
    let descriptor = descriptor.trim();
    if descriptor.contains("appsink") {
        descriptor.to_string()
    } else if descriptor.chars().all(|c| c.is_ascii_digit()) {
        format!("v4l2src device=/dev/video{} ! {}", descriptor, SINK_TAIL)
    } else if descriptor.contains("://") {
        format!("uridecodebin uri={} ! {}", descriptor, SINK_TAIL)
    } else {
        format!("{} ! {}", descriptor, SINK_TAIL)
    }
}

/// Frame source backed by GStreamer pipelines.
pub struct GStreamerSource;

impl GStreamerSource {
    pub fn new() -> Result<Self> {
        gstreamer::init()
            .map_err(|e| TrackerError::CameraError(format!("Failed to initialize GStreamer: {}", e)))?;
        Ok(Self)
    }
}

impl FrameSource for GStreamerSource {
    fn open(&self, camera_id: u32, descriptor: &str) -> Result<Box<dyn FrameStream>> {
        let description = pipeline_description(descriptor);
        info!(camera_id, pipeline = %description, "Creating GStreamer pipeline");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| TrackerError::CameraError(format!("Invalid pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| TrackerError::CameraError("Failed to downcast to pipeline".to_string()))?;

        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| TrackerError::CameraError("No appsink element found in pipeline".to_string()))?
            .downcast::<AppSink>()
            .map_err(|_| TrackerError::CameraError("Failed to downcast to AppSink".to_string()))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| TrackerError::CameraError(format!("Failed to start pipeline: {}", e)))?;

        Ok(Box::new(GStreamerStream {
            camera_id,
            pipeline,
            sink,
            sequence_num: 0,
        }))
    }
}

struct GStreamerStream {
    camera_id: u32,
    pipeline: gstreamer::Pipeline,
    sink: AppSink,
    sequence_num: u64,
}

impl FrameStream for GStreamerStream {
    fn read(&mut self) -> Option<CameraFrame> {
        let sample = self
            .sink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(PULL_TIMEOUT_MS))?;
        let info = sample.caps().and_then(|caps| VideoInfo::from_caps(caps).ok())?;
        let buffer = sample.buffer()?;
        let map = buffer.map_readable().ok()?;

        let stride = usize::try_from(*info.stride().first()?).ok()?;
        let image = packed_rgb(map.as_slice(), info.width(), info.height(), stride)?;

        self.sequence_num += 1;
        Some(CameraFrame {
            camera_id: self.camera_id,
            image,
            timestamp_ms: current_timestamp_ms(),
            sequence_num: self.sequence_num,
        })
    }

    fn close(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(camera_id = self.camera_id, "Failed to stop pipeline: {}", e);
        }
    }
}

impl Drop for GStreamerStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Copies RGB rows out of a buffer whose rows may be padded to `stride`.
fn packed_rgb(data: &[u8], width: u32, height: u32, stride: usize) -> Option<RgbImage> {
    let row = width as usize * 3;
    if height == 0 || stride < row || data.len() < stride * (height as usize - 1) + row {
        return None;
    }
    let mut packed = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        packed.extend_from_slice(&data[y * stride..y * stride + row]);
    }
    RgbImage::from_raw(width, height, packed)
}
