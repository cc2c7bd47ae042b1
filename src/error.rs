use std::time::Duration;

use crate::engine::types::EventKind;
use crate::engine::validator::BookViolation;
use crate::session::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("logon rejected: {0}")]
    LogonRejected(String),
    #[error("failed to sign logon: {0}")]
    Auth(String),
    #[error("transport is not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[from] TransportError),
    #[error("session not ready after {waited:?}")]
    Timeout { waited: Duration },
    #[error("order book invariant violated: {0}")]
    InvariantViolation(#[from] BookViolation),
    #[error("session is not ready (state: {state})")]
    NotReady { state: SessionState },
    #[error("operation not allowed in state {state}")]
    InvalidState { state: SessionState },
    #[error("{kind} handler failed: {message}")]
    Handler { kind: EventKind, message: String },
}

impl From<config::ConfigError> for ClientError {
    fn from(e: config::ConfigError) -> Self {
        ClientError::ConfigInvalid(e.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
