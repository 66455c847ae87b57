//! # Error Types
//!
//! Every fallible operation of the telemetry client reports a [`ClientError`].
//! Cache and buffer operations are total and never appear here: absence is a
//! normal miss, not an error.

use std::time::Duration;
use thiserror::Error;

/// Message the upstream uses to reject credentials.
pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed";
/// Message the upstream uses when throttling a client.
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded";

/// Failures reported by a [`Transport`](crate::connection::transport::Transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("transport is closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Classifies a raw upstream error message.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if message == AUTH_FAILED_MESSAGE {
            TransportError::Auth(message)
        } else if message == RATE_LIMIT_MESSAGE {
            TransportError::RateLimited(message)
        } else {
            TransportError::Network(message)
        }
    }
}

/// Error taxonomy used to decide how the manager reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket-level failure; retried with backoff up to `max_attempts`.
    TransientNetwork,
    /// Credentials rejected; automatic retries halt until an explicit reconnect.
    AuthFailure,
    /// Upstream throttling; cooldown without consuming reconnect attempts.
    RateLimited,
    /// A single acknowledged request went unanswered.
    AckTimeout,
    /// Inbound payload missing required fields; dropped locally.
    MalformedPayload,
    /// Anything outside the taxonomy (config, shutdown).
    Other,
}

/// The crate-wide error type.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("authentication failed; waiting for a credential refresh")]
    AuthFailed,

    #[error("gave up reconnecting after {attempts} consecutive failures")]
    ReconnectExhausted { attempts: u32 },

    #[error("no acknowledgment for '{event}' within {timeout:?}")]
    AckTimeout { event: String, timeout: Duration },

    #[error("acknowledgment channel for '{event}' was dropped by the transport")]
    AckDropped { event: String },

    #[error("queued '{event}' expired before the connection came back")]
    QueueExpired { event: String },

    #[error("malformed '{event}' payload: {reason}")]
    MalformedPayload { event: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("telemetry client has shut down")]
    ShutDown,
}

impl ClientError {
    /// Maps the error onto the taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(TransportError::Auth(_)) | ClientError::AuthFailed => {
                ErrorKind::AuthFailure
            }
            ClientError::Transport(TransportError::RateLimited(_)) => ErrorKind::RateLimited,
            ClientError::Transport(_) | ClientError::ReconnectExhausted { .. } => {
                ErrorKind::TransientNetwork
            }
            ClientError::AckTimeout { .. } | ClientError::AckDropped { .. } => ErrorKind::AckTimeout,
            ClientError::MalformedPayload { .. } => ErrorKind::MalformedPayload,
            ClientError::QueueExpired { .. } | ClientError::Config(_) | ClientError::ShutDown => {
                ErrorKind::Other
            }
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
