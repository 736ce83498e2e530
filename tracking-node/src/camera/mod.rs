use image::RgbImage;

use crate::error::Result;

pub mod capture;
#[cfg(feature = "gstreamer")]
pub mod gstreamer;

#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub camera_id: u32,
    pub image: RgbImage,
    pub timestamp_ms: u64,
    pub sequence_num: u64,
}

impl CameraFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Opens video streams from a source descriptor.
pub trait FrameSource: Send + Sync {
    fn open(&self, camera_id: u32, descriptor: &str) -> Result<Box<dyn FrameStream>>;
}

/// An opened video stream. `read` returns `None` on a read failure, after
/// which the caller closes the stream and reopens the source.
pub trait FrameStream: Send {
    fn read(&mut self) -> Option<CameraFrame>;

    fn close(&mut self) {}
}
