//! Advisory failures

use thiserror::Error;

/// Typed failures of an advisory request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdvisoryError {
    /// Network failure, timeout, or a server-side/rate-limit response
    #[error("Advisory transport error: {0}")]
    Transport(String),

    /// The service refused the request (bad request, auth failure)
    #[error("Advisory request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response decoded but carried no usable text
    #[error("Malformed advisory response: {0}")]
    Malformed(String),

    /// The caller's deadline passed or it cancelled the request
    #[error("Advisory request cancelled")]
    Cancelled,
}

impl AdvisoryError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Only transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Stable, machine-readable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Rejected { .. } => "rejected",
            Self::Malformed(_) => "malformed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<reqwest::Error> for AdvisoryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(AdvisoryError::transport("reset").is_retryable());
        assert!(!AdvisoryError::Rejected {
            status: 401,
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!AdvisoryError::malformed("no choices").is_retryable());
        assert!(!AdvisoryError::Cancelled.is_retryable());
    }

    #[test]
    fn test_kind() {
        assert_eq!(AdvisoryError::transport("x").kind(), "transport");
        assert_eq!(AdvisoryError::Cancelled.kind(), "cancelled");
        assert_eq!(
            AdvisoryError::Rejected {
                status: 400,
                message: String::new()
            }
            .to_string(),
            "Advisory request rejected (400): "
        );
    }
}
