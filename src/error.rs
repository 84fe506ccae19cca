//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **`AppError`**: errors returned by HTTP handlers, converted to JSON responses
//!   through actix-web's `ResponseError` trait.
//! - **Session errors**: the taxonomy used by the session orchestrator and its
//!   collaborators (`SessionError`, `TransportError`, `RecognitionError`,
//!   `GenerationError`, `SynthesisError`).
//!
//! ## Propagation Policy:
//! - Failures while creating a session are returned to the caller of `create`.
//! - Failures inside a turn never leave the turn: the pipeline reports the turn as
//!   interrupted and the session stays usable.
//! - Transport failures are logged per audio chunk and never stop a turn.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned from HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Requested resource (usually a session) was not found
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

/// Converts handler errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "Session 'abc' not found",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
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

/// A session could not be created. Nothing is registered when this is returned.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// A collaborator (recognizer, synthesizer) failed to initialize
    Creation(String),

    /// The registry already holds `max_concurrent_sessions` sessions
    CapacityReached(usize),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Creation(msg) => write!(f, "Session creation failed: {}", msg),
            SessionError::CapacityReached(max) => {
                write!(f, "Maximum concurrent sessions ({}) reached", max)
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<RecognitionError> for SessionError {
    fn from(err: RecognitionError) -> Self {
        SessionError::Creation(err.to_string())
    }
}

/// Sending audio to the calling party failed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The peer already went away
    Closed,

    /// The transport refused or failed to deliver this chunk
    Send(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "Transport closed"),
            TransportError::Send(msg) => write!(f, "Transport send failed: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Speech recognizer connection or processing failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionError {
    /// Could not open the recognizer connection
    Connect(String),

    /// The recognizer stream failed after it was established
    Stream(String),

    /// Audio was submitted to a recognizer that is not running
    NotRunning,
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionError::Connect(msg) => write!(f, "Recognizer connection failed: {}", msg),
            RecognitionError::Stream(msg) => write!(f, "Recognizer stream failed: {}", msg),
            RecognitionError::NotRunning => write!(f, "Recognizer is not running"),
        }
    }
}

impl std::error::Error for RecognitionError {}

/// Text generator failure, either when opening the stream or mid-stream.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// The request could not be sent
    Request(String),

    /// The generator answered with a non-success status
    Status(u16, String),

    /// The stream broke or produced something unparseable
    Stream(String),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Request(msg) => write!(f, "Generation request failed: {}", msg),
            GenerationError::Status(status, body) => {
                write!(f, "Generator returned status {}: {}", status, body)
            }
            GenerationError::Stream(msg) => write!(f, "Generation stream failed: {}", msg),
        }
    }
}

impl std::error::Error for GenerationError {}

/// Speech synthesizer failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisError {
    /// The request could not be sent
    Request(String),

    /// The synthesizer answered with a non-success status
    Status(u16, String),

    /// The audio stream broke mid-way
    Stream(String),
}

impl fmt::Display for SynthesisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisError::Request(msg) => write!(f, "Synthesis request failed: {}", msg),
            SynthesisError::Status(status, body) => {
                write!(f, "Synthesizer returned status {}: {}", status, body)
            }
            SynthesisError::Stream(msg) => write!(f, "Synthesis stream failed: {}", msg),
        }
    }
}

impl std::error::Error for SynthesisError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let response = AppError::NotFound("Session 'x' not found".to_string()).error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_internal_maps_to_500() {
        let response = AppError::Internal("boom".to_string()).error_response();
        assert_eq!(
            response.status(),
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_recognition_error_becomes_creation_error() {
        let err: SessionError = RecognitionError::Connect("refused".to_string()).into();
        assert_eq!(
            err,
            SessionError::Creation("Recognizer connection failed: refused".to_string())
        );
    }

    #[test]
    fn test_capacity_message() {
        let err = SessionError::CapacityReached(3);
        assert_eq!(err.to_string(), "Maximum concurrent sessions (3) reached");
    }
}
