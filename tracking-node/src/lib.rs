pub mod camera;
pub mod config;
pub mod error;
pub mod inference;
pub mod maintenance;
pub mod messaging;
pub mod processing;
pub mod recognition;
pub mod storage;
pub mod supervisor;
pub mod tracking;
pub mod utils;

pub use config::{PipelineConfig, TrackerConfig, TuningSettings};
pub use error::{Result, TrackerError};
pub use supervisor::{Collaborators, TrackerStatus, TrackerSupervisor};
