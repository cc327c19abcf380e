//! Error types for the sync engine core.
//!
//! One enum per failure domain: the push channel, history fetches, sends, and
//! subscription listeners. Failures in one domain never escalate into another:
//! a listener error does not affect the connection, and a failed fetch does
//! not affect the cursor.

use std::time::Duration;

use murmur_proto::ProtocolError;
use thiserror::Error;

/// Push-channel failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation needs an open channel.
    #[error("not connected")]
    NotConnected,

    /// Server refused the credential; retrying will not help.
    #[error("connection rejected: {reason}")]
    Rejected {
        /// Server-provided reason, or the HTTP status
        reason: String,
    },

    /// Channel closed without a clean close handshake, or a transport error.
    #[error("connection lost: {reason}")]
    Abnormal {
        /// Close code/reason or transport error text
        reason: String,
    },

    /// No inbound traffic for longer than the configured idle timeout.
    #[error("idle timeout after {elapsed:?}")]
    IdleTimeout {
        /// Time since the last inbound frame
        elapsed: Duration,
    },

    /// Every scheduled reconnect attempt failed.
    #[error("gave up after {attempts} reconnect attempts")]
    AttemptsExhausted {
        /// Number of attempts made
        attempts: u32,
    },

    /// Channel endpoint is not a usable `ws://` or `wss://` URL.
    #[error("invalid channel endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ConnectionError {
    /// Returns true if the reconnect loop recovers from this error on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Abnormal { .. } | Self::IdleTimeout { .. })
    }
}

/// History fetch failures.
///
/// Never fatal: the cursor stays where it was and the next load retries the
/// same page.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// Request did not complete.
    #[error("history transport error: {0}")]
    Transport(String),

    /// Server answered with a non-success status.
    #[error("history request failed with status {0}")]
    Status(u16),

    /// Response did not match the expected schema.
    #[error("invalid history page: {0}")]
    Protocol(#[from] ProtocolError),
}

impl HistoryError {
    /// Returns true if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(code) => *code >= 500 || *code == 429,
            Self::Protocol(_) => false,
        }
    }
}

/// Send failures. The originating message is marked failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Channel was not connected when the send was issued.
    #[error("not connected")]
    NotConnected,

    /// Server refused the message.
    #[error("send rejected: {0}")]
    Rejected(String),

    /// Request did not complete.
    #[error("send transport error: {0}")]
    Transport(String),
}

impl SendError {
    /// Returns true if a manual resend may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Transport(_))
    }
}

/// Failure reported by a subscription listener.
///
/// Logged and counted by the registry; never propagated to the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    /// Wrap a failure description.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
