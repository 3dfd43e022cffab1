use std::fmt;

/// Errors from the conversion queue and its encoders
#[derive(Debug)]
pub enum ConvertError {
    InvalidRequest(String),
    Spawn(String),
    EncoderFailed(String),
    Io(std::io::Error),
    UnknownJob(String),
    NotCancellable(String),
    QueueClosed,
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::InvalidRequest(msg) => write!(f, "Invalid conversion request: {}", msg),
            ConvertError::Spawn(msg) => write!(f, "Failed to start encoder: {}", msg),
            ConvertError::EncoderFailed(msg) => write!(f, "Encoder failed: {}", msg),
            ConvertError::Io(err) => write!(f, "IO error: {}", err),
            ConvertError::UnknownJob(id) => write!(f, "Unknown conversion job: {}", id),
            ConvertError::NotCancellable(id) => write!(f, "Job {} is no longer pending", id),
            ConvertError::QueueClosed => write!(f, "Conversion queue is shut down"),
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConvertError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(err: std::io::Error) -> Self {
        ConvertError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
