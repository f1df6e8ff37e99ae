//! Error types for the dashboard client.

use thiserror::Error;

/// Errors returned by the backend REST client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not match the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend answered with a non-success status
    #[error("API error: {status} ({path})")]
    Status { status: u16, path: String },

    /// URL could not be built from the configured base
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// HTTP status if the backend answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Errors surfaced by [`crate::runner::RunController::run`].
#[derive(Debug, Error)]
pub enum RunError {
    /// The backend never accepted the run; no polling was started.
    #[error("failed to start run for {target}: {source}")]
    Start {
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_reports_code() {
        let err = ApiError::Status {
            status: 404,
            path: "/markets/m1".to_string(),
        };
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(err.to_string(), "API error: 404 (/markets/m1)");
    }

    #[test]
    fn start_error_names_target() {
        let err = RunError::Start {
            target: "m1".to_string(),
            source: anyhow::anyhow!("API error: 500").into(),
        };
        assert!(err.to_string().contains("m1"));
        assert!(err.to_string().contains("500"));
    }
}
