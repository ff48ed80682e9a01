//! Client-facing error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Default message when the server rejects a socket request without one.
pub const DEFAULT_REJECTION_MESSAGE: &str = "request failed";

/// Errors returned by the socket, REST and session layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The socket is not connected; nothing was sent.
    #[error("websocket not connected")]
    ConnectionUnavailable,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The connection was lost or closed while the call was outstanding.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    /// The server answered with `success: false`.
    #[error("server rejected request: {0}")]
    ServerRejected(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// Envelope with a code other than success or unauthorized.
    #[error("request failed ({code}): {msg}")]
    Envelope { code: i64, msg: String },
    #[error("deserialization error: {0}")]
    Deserialize(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ApiError {
    /// Whether this error must end the session.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
            || matches!(self, ApiError::Http { status: 401, .. })
    }

    pub fn rejected(msg: Option<String>) -> Self {
        ApiError::ServerRejected(msg.unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string()))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Deserialize(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_variants() {
        assert!(ApiError::Unauthorized("expired".into()).is_unauthorized());
        assert!(ApiError::Http {
            status: 401,
            body: String::new()
        }
        .is_unauthorized());
        assert!(!ApiError::Http {
            status: 403,
            body: String::new()
        }
        .is_unauthorized());
        assert!(!ApiError::Timeout(Duration::from_secs(10)).is_unauthorized());
    }

    #[test]
    fn rejection_default_message() {
        assert_eq!(
            ApiError::rejected(None),
            ApiError::ServerRejected(DEFAULT_REJECTION_MESSAGE.to_string())
        );
        assert_eq!(
            ApiError::rejected(Some("gone".into())).to_string(),
            "server rejected request: gone"
        );
    }
}
