//! Error types for the desktop bridge

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use conversion_queue::ConvertError;
use media_cache::CacheError;
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum BridgeError {
    Cache(CacheError),
    Convert(ConvertError),
    Drag(String),
    NotFound(String),
    BadRequest(String),
    Config(String),
    Io(Box<std::io::Error>),
}

impl BridgeError {
    fn status(&self) -> StatusCode {
        match self {
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::Cache(CacheError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            BridgeError::Convert(ConvertError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            BridgeError::Convert(ConvertError::UnknownJob(_)) => StatusCode::NOT_FOUND,
            BridgeError::Convert(ConvertError::NotCancellable(_)) => StatusCode::CONFLICT,
            BridgeError::Convert(ConvertError::QueueClosed) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Drag(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Cache(err) => write!(f, "Cache error: {}", err),
            BridgeError::Convert(err) => write!(f, "Conversion error: {}", err),
            BridgeError::Drag(msg) => write!(f, "Drag error: {}", msg),
            BridgeError::NotFound(msg) => write!(f, "Not found: {}", msg),
            BridgeError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            BridgeError::Config(msg) => write!(f, "Configuration error: {}", msg),
            BridgeError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Cache(err) => Some(err),
            BridgeError::Convert(err) => Some(err),
            BridgeError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<CacheError> for BridgeError {
    fn from(err: CacheError) -> Self {
        BridgeError::Cache(err)
    }
}

impl From<ConvertError> for BridgeError {
    fn from(err: ConvertError) -> Self {
        BridgeError::Convert(err)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::BadRequest(err.to_string())
    }
}

impl From<tracing_subscriber::filter::ParseError> for BridgeError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = BridgeError::Config("PORT out of range".to_string());
        assert_eq!(format!("{}", err), "Configuration error: PORT out of range");
    }

    #[test]
    fn test_cache_error_keeps_source() {
        let err = BridgeError::from(CacheError::Cancelled);
        assert_eq!(format!("{}", err), "Cache error: Download cancelled");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            BridgeError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BridgeError::from(ConvertError::NotCancellable("a".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BridgeError::from(ConvertError::UnknownJob("a".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BridgeError::Io(Box::new(std::io::Error::other("disk"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
