//! Client error type.

use thiserror::Error;

/// Failures talking to the appliance API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The service is not reachable or not ready yet.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The appliance rejected the credentials or the session.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The appliance rejected a request.
    #[error("request rejected with status {status}: {message}")]
    Request {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// An asynchronous appliance task did not complete successfully.
    #[error("task {uri} ended in state {state}: {message}")]
    Task {
        uri: String,
        state: String,
        message: String,
    },

    /// The response body could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Returns true for failures that may clear up by waiting.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns true if the appliance rejected the credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unavailable(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(ClientError::Unavailable("connection refused".into()).is_transient());
        assert!(!ClientError::Auth("bad password".into()).is_transient());
        assert!(!ClientError::Request {
            status: 400,
            code: None,
            message: "bad".into(),
        }
        .is_transient());
    }
}
