//! Unified error handling for sluice.
//!
//! One error enum covers the whole transport so callers can match on the
//! failure kind without caring whether the ring they attached to is a local
//! shared-memory segment or a TCP bridge session. Attach-time errors
//! (`NotFound`, `AlreadyExists`, `AlreadyOwned`, `Full`) surface synchronously
//! and are never retried internally; run-time errors (`Lapped`, `PeerGone`,
//! `Timeout`, `Malformed`) are returned so the caller can decide to reattach,
//! skip, or abort.

use thiserror::Error;

/// Main error type for sluice operations.
#[derive(Debug, Error)]
pub enum SluiceError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No ring of the given name exists
    #[error("Ring not found: {0}")]
    NotFound(String),

    /// A live ring of the given name already exists
    #[error("Ring already exists: {0}")]
    AlreadyExists(String),

    /// Another live producer already owns the ring
    #[error("Ring '{ring}' already has a producer (pid {pid})")]
    AlreadyOwned { ring: String, pid: u32 },

    /// All consumer slots of the ring are taken
    #[error("Ring '{0}' has no free consumer slots")]
    Full(String),

    /// The producer overwrote this consumer's unread backlog; the handle is
    /// dead until the consumer reattaches
    #[error("Consumer was lapped by the producer on ring '{0}'")]
    Lapped(String),

    /// The peer went away: remote connection dropped, or a local peer process
    /// died / removed the ring underneath an attached handle
    #[error("Peer gone: {0}")]
    PeerGone(String),

    /// Bounded wait expired
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A decoded item is inconsistent with the bytes that carry it. Fatal to
    /// the stream: there is no safe mid-ring resynchronization.
    #[error("Malformed item: {0}")]
    Malformed(String),

    /// Shared memory management errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bridge wire-protocol violations
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience type alias for Results using SluiceError
pub type SluiceResult<T> = std::result::Result<T, SluiceError>;

/// Outcome of a consumer-side read.
///
/// End-of-stream (the ring was destroyed, or the bridge socket closed) is an
/// ordinary outcome, not an error; exceptional conditions stay in the `Err`
/// channel of the surrounding `SluiceResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Read<T> {
    /// Data was delivered.
    Data(T),
    /// The stream ended; no further data will arrive on this handle.
    EndOfStream,
}

impl<T> Read<T> {
    /// Map the data variant, preserving end-of-stream.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Read<U> {
        match self {
            Read::Data(v) => Read::Data(f(v)),
            Read::EndOfStream => Read::EndOfStream,
        }
    }

    /// Unwrap the data variant; panics on end-of-stream. Test helper.
    pub fn into_data(self) -> T {
        match self {
            Read::Data(v) => v,
            Read::EndOfStream => panic!("unexpected end of stream"),
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Read::EndOfStream)
    }
}

// Helper constructors
impl SluiceError {
    /// Create a memory error with a custom message
    pub fn memory<S: Into<String>>(msg: S) -> Self {
        SluiceError::Memory(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SluiceError::Config(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        SluiceError::Protocol(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        SluiceError::InvalidInput(msg.into())
    }

    /// Create a malformed-item error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        SluiceError::Malformed(msg.into())
    }

    /// True for the attach-time kinds that indicate caller misuse and must
    /// never be auto-retried.
    pub fn is_attach_error(&self) -> bool {
        matches!(
            self,
            SluiceError::NotFound(_)
                | SluiceError::AlreadyExists(_)
                | SluiceError::AlreadyOwned { .. }
                | SluiceError::Full(_)
        )
    }
}

impl From<toml::de::Error> for SluiceError {
    fn from(err: toml::de::Error) -> Self {
        SluiceError::Config(format!("TOML parse error: {}", err))
    }
}
