// crates/core/src/error.rs
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

pub use fedwatch_types::MalformedMessage;

/// Authentication failures. Never retried by the caller's behalf.
///
/// `Clone` because one refresh outcome is handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("No refresh credential available")]
    NoRefreshCredential,

    /// The session this operation belonged to was logged out (or replaced)
    /// before it settled.
    #[error("Session ended before the operation completed")]
    SessionEnded,

    #[error("Access credential rejected")]
    Unauthorized,

    #[error("Auth API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Auth transport error: {0}")]
    Transport(String),

    #[error("Auth response decode error: {0}")]
    Decode(String),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// True when the server said the credential itself is bad, as opposed to
    /// the request never getting an answer.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials | AuthError::RefreshRejected(_) | AuthError::Unauthorized
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AuthError::Decode(e.to_string())
        } else {
            AuthError::Transport(e.to_string())
        }
    }
}

/// Failures of calls made through the request gateway.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Authorization failed and could not be recovered by a refresh.
    /// The session has already been logged out when this is returned.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Request failed with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Response decode error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Request body encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Invalid request URL: {0}")]
    Url(String),
}

impl RequestError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RequestError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            RequestError::Status { status, .. } => Some(*status),
            RequestError::Transport(e) => e.status(),
            _ => None,
        }
    }
}

/// Why a live connection ended. Internal to the connector; transient
/// variants are absorbed by the reconnect backoff and only logged.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("Server rejected the stream credential")]
    Unauthorized,

    #[error("Connection dropped: {0}")]
    Dropped(String),

    #[error("Server closed the stream (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("No frame received for {0:?}")]
    IdleTimeout(std::time::Duration),

    #[error("Not logged in")]
    NoCredential,
}

impl ChannelError {
    /// Terminal closures stop the reconnect loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelError::Unauthorized | ChannelError::NoCredential)
    }
}

/// Errors loading [`crate::config::ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        assert!(AuthError::InvalidCredentials.is_rejection());
        assert!(AuthError::RefreshRejected("expired".into()).is_rejection());
        assert!(!AuthError::Transport("connection refused".into()).is_rejection());
        assert!(!AuthError::SessionEnded.is_rejection());
    }

    #[test]
    fn test_channel_terminal() {
        assert!(ChannelError::Unauthorized.is_terminal());
        assert!(!ChannelError::Closed { code: 1011, reason: String::new() }.is_terminal());
        assert!(!ChannelError::Dropped("reset".into()).is_terminal());
    }

    #[test]
    fn test_request_error_status() {
        let err = RequestError::Status {
            status: StatusCode::NOT_FOUND,
            body: "{}".into(),
        };
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(RequestError::Unauthorized.status(), Some(StatusCode::UNAUTHORIZED));
    }
}
