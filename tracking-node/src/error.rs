use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Camera error: {0}")]
    CameraError(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Identity index error: {0}")]
    IndexError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Attendance API error: {0}")]
    AttendanceApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("Startup error: {0}")]
    StartupError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for TrackerError {
    fn from(error: reqwest::Error) -> Self {
        TrackerError::AttendanceApiError(error.to_string())
    }
}

impl From<config::ConfigError> for TrackerError {
    fn from(error: config::ConfigError) -> Self {
        TrackerError::ConfigError(error.to_string())
    }
}

impl From<validator::ValidationErrors> for TrackerError {
    fn from(error: validator::ValidationErrors) -> Self {
        TrackerError::ConfigError(error.to_string())
    }
}

impl From<prometheus::Error> for TrackerError {
    fn from(error: prometheus::Error) -> Self {
        TrackerError::ProcessingError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
