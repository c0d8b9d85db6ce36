use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    #[error("Error: {0}")]
    LapjvError(String),
    #[error("degenerate calibration geometry: {0}")]
    DegenerateGeometry(String),
    #[error("point maps to infinity under the calibration mapping")]
    PointAtInfinity,
    #[error("frame {got} observed after frame {last}")]
    FrameOutOfOrder { last: usize, got: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),
}

impl From<serde_json::Error> for TrackError {
    fn from(err: serde_json::Error) -> Self {
        TrackError::ConfigParse(err.to_string())
    }
}
