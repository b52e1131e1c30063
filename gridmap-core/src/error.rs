//! Error types for GridMap operations.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// The main error type for GridMap operations.
///
/// Covers transport failures, per-request deadlines, protocol violations,
/// and precondition failures raised on the client, as well as errors relayed
/// by the server.
#[derive(Debug, Error, Clone)]
pub enum GridError {
    /// The underlying connection or stream broke.
    #[error("connection error: {0}")]
    Connection(String),

    /// A per-request deadline elapsed before the response or ack arrived.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// The operation was cancelled because the session or stream was closed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A malformed or unexpected message was received.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The requested operation is not supported on this view.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The operation is not valid in the current state, such as a released
    /// map or a closed session.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An error relayed by the server in response to a request.
    #[error("server error: {0}")]
    Server(String),

    /// I/O errors from the standard library (wrapped in `Arc` for `Clone`).
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for GridError {
    fn from(err: io::Error) -> Self {
        GridError::Io(Arc::new(err))
    }
}

impl GridError {
    /// Returns `true` if this error was caused by a deliberate close.
    ///
    /// Cancellation errors are expected while a session is shutting down and
    /// are suppressed instead of being surfaced on the error channel.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns `true` if this error indicates a broken transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_))
    }
}

/// A specialized `Result` type for GridMap operations.
pub type Result<T> = std::result::Result<T, GridError>;
