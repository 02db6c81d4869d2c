use std::io;
use thiserror::Error;

/// Error raised by an application-supplied producer or consumer
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Failure inside the TLS engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected the peer during the handshake
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] rustls::Error),

    /// Malformed or unexpected TLS record after the handshake
    #[error("TLS stream error: {0}")]
    Protocol(#[source] rustls::Error),

    /// The ciphertext stream ended before the handshake completed
    #[error("Connection closed during TLS handshake")]
    HandshakeInterrupted,

    /// Failure moving bytes through the engine's buffers
    #[error("TLS engine I/O failure: {0}")]
    Io(#[from] io::Error),
}

/// Reason passed to [`Protocol::connection_lost`]
///
/// A clean TLS shutdown passes through whatever reason the underlying
/// transport gave for closing, normally [`CloseReason::Done`].  The
/// other variants let callers tell engine failures apart from
/// transport failures.
///
/// [`Protocol::connection_lost`]: crate::Protocol::connection_lost
#[derive(Debug, Error)]
pub enum CloseReason {
    /// Connection closed normally
    #[error("Connection was closed cleanly")]
    Done,

    /// Connection dropped without an orderly TLS close
    #[error("Connection to the other side was lost: {0}")]
    Lost(String),

    /// The underlying transport failed to accept outgoing data
    #[error("Transport write failed: {0}")]
    Transport(#[source] io::Error),

    /// The TLS engine failed
    #[error(transparent)]
    Tls(#[from] EngineError),
}

impl CloseReason {
    /// Was this an orderly close?
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Did the failure come from inside the TLS engine?
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

/// A second producer was registered while one was already active
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("A producer is already registered")]
pub struct AlreadyRegistered;

/// Destination for errors that are handled locally rather than
/// terminating the connection, i.e. faults in application producers
pub trait ErrorSink {
    /// Record `error`, which occurred in the situation described by
    /// `context`
    fn report(&self, error: &dyn std::error::Error, context: &str);
}

/// [`ErrorSink`] which logs through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, error: &dyn std::error::Error, context: &str) {
        tracing::error!(error = %error, "{context}");
    }
}
