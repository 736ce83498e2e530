use crossbeam::queue::ArrayQueue;
use image::RgbImage;

/// Fixed-capacity pools of frame and embedding buffers. A miss allocates,
/// a release into a full pool drops the buffer; nothing depends on hits.
pub struct ResourcePools {
    frames: ArrayQueue<RgbImage>,
    embeddings: ArrayQueue<Vec<f32>>,
    embedding_dim: usize,
}

impl ResourcePools {
    pub fn new(frame_capacity: usize, embedding_capacity: usize, embedding_dim: usize) -> Self {
        Self {
            frames: ArrayQueue::new(frame_capacity.max(1)),
            embeddings: ArrayQueue::new(embedding_capacity.max(1)),
            embedding_dim,
        }
    }

    /// Returns a frame buffer of the requested shape. Its contents are
    /// unspecified; callers overwrite every pixel.
    pub fn acquire_frame(&self, width: u32, height: u32) -> RgbImage {
        match self.frames.pop() {
            Some(buffer) if buffer.dimensions() == (width, height) => buffer,
            _ => RgbImage::new(width, height),
        }
    }

    pub fn release_frame(&self, buffer: RgbImage) {
        let _ = self.frames.push(buffer);
    }

    /// Returns an empty embedding buffer with room for at least `len` values.
    pub fn acquire_embedding(&self, len: usize) -> Vec<f32> {
        match self.embeddings.pop() {
            Some(mut buffer) => {
                buffer.clear();
                buffer.reserve(len);
                buffer
            }
            None => Vec::with_capacity(len.max(self.embedding_dim)),
        }
    }

    pub fn release_embedding(&self, buffer: Vec<f32>) {
        let _ = self.embeddings.push(buffer);
    }

    pub fn pooled_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn pooled_embeddings(&self) -> usize {
        self.embeddings.len()
    }
}
