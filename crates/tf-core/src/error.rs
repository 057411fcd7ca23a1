//! Typed error definitions for the broker.
//!
//! [`TfError`] covers configuration, decoding and I/O failures. The narrower
//! [`TransportError`] and [`PublishError`] are what the hot paths return, so
//! callers can match on them without string inspection. None of these is fatal
//! to the whole process: transport errors end one connection, malformed
//! requests are discarded, and publish timeouts are the producer's concern.

use thiserror::Error;

/// Domain-specific errors.
#[derive(Debug, Error)]
pub enum TfError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// A client message that could not be decoded into a subscription request.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Connection-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Thread or task could not be started.
    #[error("spawn error: {0}")]
    Spawn(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure on a single duplex connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Peer closed, EOF or broken pipe.
    #[error("connection closed")]
    Closed,

    /// Framing or handshake violation reported by the transport.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket-level failure other than a close.
    #[error("io error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether this is an ordinary disconnect rather than a fault worth a warning.
    pub fn is_close(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

/// Result of handing a batch to a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The intake (queue or lock) could not accept the batch before the
    /// deadline; the whole batch was dropped.
    #[error("publish timed out")]
    TimedOut,

    /// The broker has been shut down.
    #[error("broker closed")]
    Closed,
}

/// Outcome of putting one message on a subscriber's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Queue at capacity; the message was not queued.
    Full,
    /// Subscriber is closing or closed; the message was not queued.
    Closed,
}
