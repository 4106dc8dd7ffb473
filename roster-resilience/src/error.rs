use std::{fmt, time::Duration};

use thiserror::Error;

/// Why a request was withdrawn before it produced a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel_by_tag` matched one of the request tags.
    Tag(String),
    /// Evicted (or refused) because the pending queue was full.
    Overflow,
    /// The queue was shut down while the request was outstanding.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => write!(f, "cancelled by tag `{tag}`"),
            Self::Overflow => write!(f, "queue overflow"),
            Self::Shutdown => write!(f, "queue shut down"),
        }
    }
}

/// Failure taxonomy shared by the transport, the queue and the cache.
///
/// The HTTP status is carried as a number so retry decisions never depend on
/// message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("network error: {0}")]
    Network(String),
    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("request throttled: {0}")]
    Throttled(String),
    #[error("service unavailable: circuit open for `{0}`")]
    CircuitOpen(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request cancelled: {0}")]
    Cancelled(CancelReason),
    #[error("request queue is paused")]
    Paused,
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RequestError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400..=499 => Self::Client { status, message },
            500..=599 => Self::Server { status, message },
            _ => Self::Decode(format!("unexpected status {status}: {message}")),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } | Self::Server { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Client { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Network, 5xx and timeout failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Server { .. } | Self::Timeout(_)
        )
    }

    /// Rejected locally without touching the network; callers should treat
    /// these as "try again later".
    pub fn is_local_rejection(&self) -> bool {
        matches!(
            self,
            Self::Throttled(_) | Self::CircuitOpen(_) | Self::Paused
        )
    }
}
