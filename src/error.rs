//! Error taxonomy for conversion jobs and its mapping onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::converter::ConverterError;

/// Every way a conversion job can terminate unsuccessfully.
///
/// All variants are terminal for the request; nothing is retried. The
/// `Display` text carries operator diagnostics and is only ever logged.
/// Callers see the short message from [`JobError::public_message`].
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The server-held secret is unset (operator fault).
    #[error("worker secret is not configured")]
    Configuration,

    /// Missing or mismatched bearer credential.
    #[error("missing or invalid bearer credential")]
    Unauthorized,

    /// The request used a non-mutating verb.
    #[error("method {0} is not allowed")]
    MethodNotAllowed(String),

    /// The upload is missing, malformed, or could not be read.
    #[error("bad upload: {0}")]
    BadInput(String),

    /// The external tool could not be started or exited unsuccessfully.
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConverterError),

    /// Server-side fault after the request was accepted.
    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            JobError::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            JobError::Unauthorized => StatusCode::UNAUTHORIZED,
            JobError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            JobError::BadInput(_) => StatusCode::BAD_REQUEST,
            JobError::Conversion(_) => StatusCode::INTERNAL_SERVER_ERROR,
            JobError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-visible message. Never includes diagnostic detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            JobError::Configuration => "Server Configuration Error",
            JobError::Unauthorized => "Unauthorized",
            JobError::MethodNotAllowed(_) => "Method not allowed",
            JobError::BadInput(_) => "Failed to read file",
            JobError::Conversion(_) => "Conversion failed",
            JobError::Internal(_) => "Internal Server Error",
        }
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        (self.status(), self.public_message()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_conversion_error_hides_tool_output() {
        let err = JobError::from(ConverterError::Failed {
            exit_code: Some(1),
            output: "Invalid data found when processing input".to_string(),
        });

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Conversion failed");
        assert!(err.to_string().contains("Invalid data found"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(JobError::Configuration.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(JobError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            JobError::MethodNotAllowed("GET".into()).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(JobError::BadInput("no file".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            JobError::Internal("output missing".into()).public_message(),
            "Internal Server Error"
        );
    }
}
