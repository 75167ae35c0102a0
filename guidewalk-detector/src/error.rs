use guidewalk::GuideError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Detector is already running")]
    AlreadyRunning,

    #[error("Detector is not running")]
    NotRunning,

    #[error("Invalid value pattern: {0}")]
    InvalidPattern(String),

    #[error("Guide error: {0}")]
    Guide(#[from] GuideError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DetectorError>;
