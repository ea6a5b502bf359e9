//! # Error Handling
//!
//! Two error families live here:
//!
//! - **AppError**: failures of the HTTP surface (config endpoints, admission).
//!   These are converted into JSON HTTP responses.
//! - **LiveError**: failures of a live voice session (microphone, endpoint,
//!   inbound audio). These are reported to the WebSocket client as `error`
//!   messages and never crash the connection.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of failure
//! - **Data**: Each variant carries a human-readable detail string
//! - **Pattern matching**: Callers `match` on the variant to decide recovery
//!
//! ### Traits for Error Conversion
//! - **From trait**: Lets `?` convert library errors automatically
//! - **ResponseError trait**: Turns an AppError into an HTTP response
//! - **Display trait**: Defines the message shown to users and logs

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **BadRequest**: Client sent malformed data (400)
/// - **ValidationError**: A value failed validation rules (400)
/// - **Unavailable**: The server is at its live session limit (503)
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid or malformed data
    BadRequest(String),

    /// User input failed validation rules
    ValidationError(String),

    /// No capacity left for another live connection
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Converts AppError into a JSON HTTP response.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Server port cannot be 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

/// Failures of a live voice session.
///
/// ## Recovery Policy:
/// - **PermissionDenied**: the user refused the microphone. No retry; the user
///   must toggle again.
/// - **Connection**: the endpoint was unreachable or rejected the setup. No
///   automatic retry.
/// - **TransientEndpoint**: the endpoint failed mid-session. Treated as an
///   implicit close; no reconnect.
/// - **Decode**: one inbound frame was malformed. The frame is dropped and the
///   session keeps running.
/// - **SessionActive** / **NotOpen**: the request does not fit the current
///   session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveError {
    PermissionDenied(String),
    Connection(String),
    TransientEndpoint(String),
    Decode(String),
    SessionActive(String),
    NotOpen,
}

impl LiveError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            LiveError::PermissionDenied(_) => "permission_denied",
            LiveError::Connection(_) => "connection_error",
            LiveError::TransientEndpoint(_) => "endpoint_error",
            LiveError::Decode(_) => "decode_error",
            LiveError::SessionActive(_) => "session_active",
            LiveError::NotOpen => "not_open",
        }
    }
}

impl fmt::Display for LiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveError::PermissionDenied(msg) => write!(f, "Microphone permission denied: {}", msg),
            LiveError::Connection(msg) => write!(f, "Connection error: {}", msg),
            LiveError::TransientEndpoint(msg) => write!(f, "Endpoint error: {}", msg),
            LiveError::Decode(msg) => write!(f, "Audio decode error: {}", msg),
            LiveError::SessionActive(state) => write!(f, "A live session is already {}", state),
            LiveError::NotOpen => write!(f, "No live session is open"),
        }
    }
}

impl std::error::Error for LiveError {}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_app_error_status_codes() {
        let err = AppError::ValidationError("bad port".to_string());
        assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST);

        let err = AppError::Unavailable("full".to_string());
        assert_eq!(err.error_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_json_errors_are_bad_requests() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = AppError::from(parse_err);
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(err.to_string().starts_with("Bad request: JSON parsing error"));
        assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_live_error_codes_and_messages() {
        let err = LiveError::PermissionDenied("user declined".to_string());
        assert_eq!(err.code(), "permission_denied");
        assert!(err.to_string().contains("user declined"));

        assert_eq!(LiveError::NotOpen.code(), "not_open");
        assert_eq!(LiveError::Decode("odd length".into()).code(), "decode_error");
    }
}
