//! Errors at the remote provider boundary

use thiserror::Error;

/// Failure talking to the remote mailbox
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport failure, rate limit or server error; worth retrying
    #[error("Remote unavailable: {message}")]
    Unavailable { message: String },

    #[error("Not authorized: {message}")]
    Unauthorized { message: String },

    /// The message no longer exists remotely
    #[error("Remote message not found: {id}")]
    NotFound { id: String },

    /// The incremental cursor is too old for the provider to replay from
    #[error("Sync cursor expired or invalid")]
    CursorExpired,

    /// The provider refused the request (4xx other than auth and 404)
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<ureq::Error> for RemoteError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(status @ (401 | 403)) => Self::Unauthorized {
                message: format!("HTTP {}", status),
            },
            ureq::Error::StatusCode(status @ (429 | 500..=599)) => {
                Self::unavailable(format!("HTTP {}", status))
            }
            ureq::Error::StatusCode(status) => Self::Rejected {
                status,
                message: format!("HTTP {}", status),
            },
            other => Self::unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(RemoteError::from(ureq::Error::StatusCode(503)).is_transient());
        assert!(RemoteError::from(ureq::Error::StatusCode(429)).is_transient());
        assert!(matches!(
            RemoteError::from(ureq::Error::StatusCode(401)),
            RemoteError::Unauthorized { .. }
        ));
        assert!(!RemoteError::from(ureq::Error::StatusCode(400)).is_transient());
    }
}
