//! Error types for the device link layer.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which of the two controller frames an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Configuration,
    Telemetry,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => f.write_str("configuration"),
            Self::Telemetry => f.write_str("telemetry"),
        }
    }
}

/// A frame that could not be turned into a typed record.
///
/// Never fatal: callers keep their last good snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{frame} frame has wrong size: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        frame: FrameKind,
        expected: usize,
        actual: usize,
    },

    #[error("configuration version mismatch: expected {expected:#04x}, got {actual:#04x}")]
    VersionMismatch { expected: u8, actual: u8 },
}

/// Opaque failure reported by the wireless transport. Always treated as transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failures of the link state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Discovery was cancelled while waiting for the radio to power on
    #[error("transport never became ready")]
    TransportNotReady,

    #[error("connect attempt {attempt} failed: {source}")]
    ConnectFailed {
        attempt: u32,
        #[source]
        source: TransportError,
    },

    #[error("gave up connecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("already linked to {device_id}; disconnect first")]
    AlreadyLinked { device_id: String },

    #[error("a connect attempt is already in progress")]
    ConnectInProgress,

    #[error("no device is linked")]
    NotLinked,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors surfaced by the session facade
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("invalid GATT identifier: {0}")]
    InvalidIdentifier(#[from] uuid::Error),
}
