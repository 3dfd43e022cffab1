//! Error types for the media cache

use std::fmt;
use std::sync::Arc;

/// Errors produced while fetching, storing or evicting cached media.
///
/// Cloneable so that every caller attached to a shared download observes
/// the same failure.
#[derive(Debug, Clone)]
pub enum CacheError {
    Io(Arc<std::io::Error>),
    Http(Arc<reqwest::Error>),
    /// Remote answered with a non-success status
    Status { status: u16, url: String },
    /// Remote answered successfully but sent no bytes
    EmptyBody(String),
    /// A single artifact larger than the whole cache
    TooLarge { size: u64, max: u64 },
    /// Nothing left to evict and the artifact still does not fit
    CapacityExhausted { needed: u64, available: u64 },
    InvalidRequest(String),
    Cancelled,
    Index(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Http(err) => write!(f, "HTTP error: {}", err),
            CacheError::Status { status, url } => {
                write!(f, "Download failed with status {} for {}", status, url)
            }
            CacheError::EmptyBody(url) => write!(f, "Downloaded file is empty: {}", url),
            CacheError::TooLarge { size, max } => write!(
                f,
                "Asset of {} bytes exceeds cache capacity of {} bytes",
                size, max
            ),
            CacheError::CapacityExhausted { needed, available } => write!(
                f,
                "Cache cannot make room: {} bytes needed, {} bytes available",
                needed, available
            ),
            CacheError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            CacheError::Cancelled => write!(f, "Download cancelled"),
            CacheError::Index(msg) => write!(f, "Index error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            CacheError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Index(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let err = CacheError::Status {
            status: 404,
            url: "https://cdn.example.com/a.mp4".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Download failed with status 404 for https://cdn.example.com/a.mp4"
        );
    }

    #[test]
    fn test_too_large_display() {
        let err = CacheError::TooLarge { size: 20, max: 10 };
        assert!(err.to_string().contains("exceeds cache capacity"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error;

        let err = CacheError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(err.source().is_some());
        let cloned = err.clone();
        assert!(cloned.to_string().contains("denied"));
    }
}
