//! Error types for the resilience primitives

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Transport-level messages that indicate the network stack is wedged rather
/// than merely unlucky. Seeing one of these means the connection handle must
/// be torn down before another attempt.
const WEDGED_MARKERS: &[&str] = &[
    "exhausted",
    "already connected",
    "too many open files",
    "no buffer space",
    "address in use",
];

/// Errors produced while fetching, connecting or waiting
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Network-level failure (DNS, refused, reset, broken pipe)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request exceeded its per-call timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Sockets, streams or buffers exhausted; the handle is wedged
    #[error("Transport resources exhausted: {0}")]
    ResourceExhausted(String),

    /// Peer asked us to slow down (HTTP 429)
    #[error("Rate limited by peer")]
    RateLimited,

    /// Peer is temporarily unable to answer (5xx and friends)
    #[error("Peer unavailable (status {0})")]
    PeerUnavailable(u16),

    /// Peer rejected the request shape (400/401/403/404)
    #[error("Peer rejected request (status {0})")]
    PeerRejected(u16),

    /// Request shape was blocked after an earlier permanent rejection
    #[error("Request blocked after permanent failure: {0}")]
    Blocked(String),

    /// Connection handle could not be established
    #[error("Failed to create connection: {0}")]
    ConnectionSetup(String),

    /// The cancellation signal fired while waiting
    #[error("Operation cancelled")]
    Cancelled,

    /// Unexpected internal failure; treated like a retryable peer failure
    #[error("Internal error: {0}")]
    Logic(String),
}

/// Coarse failure classes used for retry and escalation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Transport,
    RetryablePeer,
    PermanentPeer,
    ResourceExhaustion,
    LogicError,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Transport => "transport",
            ErrorClass::RetryablePeer => "retryable-peer",
            ErrorClass::PermanentPeer => "permanent-peer",
            ErrorClass::ResourceExhaustion => "resource-exhaustion",
            ErrorClass::LogicError => "logic",
        };
        f.write_str(name)
    }
}

impl ResilienceError {
    /// Map a raw transport failure message onto the right variant.
    ///
    /// Stack exhaustion and "already connected" style failures become
    /// [`ResilienceError::ResourceExhausted`], everything else stays a plain
    /// transport error.
    pub fn from_transport_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();
        if WEDGED_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            ResilienceError::ResourceExhausted(message)
        } else {
            ResilienceError::Transport(message)
        }
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            ResilienceError::Transport(_)
            | ResilienceError::Timeout(_)
            | ResilienceError::ConnectionSetup(_) => ErrorClass::Transport,
            ResilienceError::ResourceExhausted(_) => ErrorClass::ResourceExhaustion,
            ResilienceError::RateLimited | ResilienceError::PeerUnavailable(_) => {
                ErrorClass::RetryablePeer
            }
            ResilienceError::PeerRejected(_) | ResilienceError::Blocked(_) => {
                ErrorClass::PermanentPeer
            }
            ResilienceError::Cancelled | ResilienceError::Logic(_) => ErrorClass::LogicError,
        }
    }

    /// Check if this error may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        !self.is_permanent() && !matches!(self, ResilienceError::Cancelled)
    }

    /// Check if this error must never be retried for the same request shape
    pub fn is_permanent(&self) -> bool {
        self.class() == ErrorClass::PermanentPeer
    }

    /// Check if the connection handle should be torn down before retrying
    pub fn is_wedged(&self) -> bool {
        self.class() == ErrorClass::ResourceExhaustion
    }

    /// Check if this error was caused by the peer throttling us
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ResilienceError::RateLimited)
    }
}
