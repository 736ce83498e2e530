pub mod frame_processor;

pub use frame_processor::FrameProcessor;
