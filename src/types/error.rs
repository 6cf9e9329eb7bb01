//! Error types for Parley

/// Main error type for Parley operations
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// The user is neither Party A nor Party B for the agreement.
    /// Terminal — callers must not retry.
    #[error("Not a participant: {0}")]
    NotParticipant(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Backend error: {0}")]
    Backend(String),

    /// Backend rejected the request with an HTTP status
    #[error("Backend returned {status}: {message}")]
    BackendStatus { status: u16, message: String },

    /// An action was attempted before its preconditions held
    /// (e.g. signing without full clause consensus).
    #[error("Precondition not met: {0}")]
    Precondition(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Whether the failed operation may be retried as-is.
    ///
    /// Authorization failures and precondition failures are terminal;
    /// transport and backend failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotParticipant(_) | Self::Precondition(_) | Self::BadRequest(_) => false,
            Self::Auth(_) | Self::Config(_) => false,
            Self::Channel(_) | Self::Backend(_) | Self::Internal(_) => true,
            Self::BackendStatus { status, .. } => *status >= 500,
        }
    }
}

// From conversions for common error types

impl From<std::io::Error> for ParleyError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for ParleyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ParleyError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Channel(err.to_string())
    }
}

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(!ParleyError::NotParticipant("u-1".into()).is_retryable());
        assert!(!ParleyError::Precondition("no signature".into()).is_retryable());
        assert!(ParleyError::Channel("reset".into()).is_retryable());
        assert!(ParleyError::BackendStatus {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!ParleyError::BackendStatus {
            status: 409,
            message: "conflict".into()
        }
        .is_retryable());
    }
}
