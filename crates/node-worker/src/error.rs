//! Error types for the worker protocol

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using WorkerError
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors raised by the worker server, its connections and the client SDK
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Socket or process IO failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A pair announced more bytes than a frame may carry
    #[error("Pair of {0} bytes exceeds the frame limit")]
    FrameTooLarge(u64),

    /// A pair that must carry a number did not
    #[error("Invalid number({0})")]
    InvalidNumber(String),

    /// A message other than the one the protocol expects at this point
    #[error("Expected message '{expected}', got '{got}'")]
    UnexpectedMessage { expected: String, got: String },

    /// A message name outside the protocol
    #[error("Unknown message name({0})")]
    UnknownMessage(String),

    /// The connecting process did not present the uid it was started with
    #[error("Worker uid mismatch")]
    UidMismatch,

    /// No worker binary for the node type
    #[error("Program({0}) not exist")]
    ProgramNotFound(PathBuf),

    /// The worker process could not be started
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// The worker did not connect back in time
    #[error("Worker did not connect within {0} seconds")]
    AcceptTimeout(u64),

    /// Error reported by the worker itself
    #[error("{0}")]
    Worker(String),

    /// The connection was closed by an interrupt
    #[error("Worker connection interrupted")]
    Interrupted,
}

impl WorkerError {
    /// Whether the connection that produced this error can still be used
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WorkerError::Worker(_))
    }
}
