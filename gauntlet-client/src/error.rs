//! Error types for the Gauntlet clients

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Stderr fragments that mark a backend failure as worth retrying
const TRANSIENT_MARKERS: [&str; 10] = [
    "429",
    "quota",
    "rate limit",
    "ratelimit",
    "resource_exhausted",
    "too many requests",
    "503",
    "unavailable",
    "econnreset",
    "etimedout",
];

/// Errors that can occur when talking to the backend or the admin server
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// The deploy tool could not be started
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The deploy tool exited with a failure the backend will not recover from
    #[error("'{command}' failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Rate limit, quota, or availability failure expected to succeed on retry
    #[error("Transient backend failure: {0}")]
    Transient(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Classify a failed deploy-tool invocation from its stderr
    pub fn from_command_failure(command: impl Into<String>, code: Option<i32>, stderr: &str) -> Self {
        let lowered = stderr.to_lowercase();
        if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Self::Transient(stderr.trim().to_string());
        }

        Self::CommandFailed {
            command: command.into(),
            code,
            stderr: stderr.trim().to_string(),
        }
    }

    /// Check if a retry of the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::ApiError { status, .. } => *status == 429 || *status >= 500,
            Self::RequestFailed(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_failure_is_transient() {
        let err = ClientError::from_command_failure(
            "firebase deploy",
            Some(2),
            "Error: HTTP Error: 429, Quota exceeded for quota metric 'Write requests'",
        );
        assert!(matches!(err, ClientError::Transient(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_config_failure_is_not_transient() {
        let err = ClientError::from_command_failure(
            "firebase deploy",
            Some(1),
            "Error: Invalid memory option 3GB for function t1-httpFn",
        );
        assert!(matches!(err, ClientError::CommandFailed { code: Some(1), .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_api_error_classification() {
        assert!(ClientError::api_error(429, "slow down").is_transient());
        assert!(ClientError::api_error(503, "unavailable").is_transient());
        assert!(!ClientError::api_error(400, "bad request").is_transient());
        assert!(!ClientError::api_error(404, "missing").is_transient());
    }
}
