//! Error taxonomy for backend calls.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection refused, reset, timed out, ...
    #[error("network error: {0}")]
    Network(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Structured `success: false` answer.
    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl BackendError {
    /// Network failures, 429 and 5xx are retried; everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Network(_) => true,
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// True for answers that mean the cached token is no longer accepted.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Status { status: 401, .. })
    }

    /// Login failed, or the backend kept refusing a freshly obtained token.
    /// No request can succeed until the credentials are fixed.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, BackendError::Auth(_)) || self.is_unauthorized()
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Status {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> BackendError {
        BackendError::Status {
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BackendError::Network("reset".into()).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());

        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!BackendError::Rejected("no".into()).is_retryable());
        assert!(!BackendError::Cancelled.is_retryable());
        assert!(!BackendError::Decode("bad json".into()).is_retryable());
    }

    #[test]
    fn test_unauthorized() {
        assert!(status(401).is_unauthorized());
        assert!(!status(403).is_unauthorized());
        assert!(status(401).is_auth_failure());
        assert!(BackendError::Auth("bad password".into()).is_auth_failure());
        assert!(!status(403).is_auth_failure());
        assert!(!BackendError::Rejected("no".into()).is_auth_failure());
    }
}
