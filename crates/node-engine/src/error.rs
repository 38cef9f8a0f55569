//! Error types for the node engine

use thiserror::Error;

/// Result type alias using NodeEngineError
pub type Result<T> = std::result::Result<T, NodeEngineError>;

/// Errors that can occur in the node engine
#[derive(Debug, Error)]
pub enum NodeEngineError {
    /// No node with this id or path
    #[error("Node({0}) not found")]
    NodeNotFound(String),

    /// Node has no attribute with this name
    #[error("Attribute({0}) not found")]
    AttrNotFound(String),

    /// Node type missing from the registry
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Structural edit that the graph does not allow
    #[error("Invalid graph edit: {0}")]
    InvalidEdit(String),

    /// Node body failed
    #[error("{0}")]
    ExecutionFailed(String),

    /// Execution was cancelled
    #[error("Execution cancelled")]
    Cancelled,

    /// Download or HTTP service failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database collaborator failure
    #[error("Database error: {0}")]
    Database(String),

    /// External worker failure
    #[error(transparent)]
    Worker(#[from] node_worker::WorkerError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeEngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }
}

impl From<rusqlite::Error> for NodeEngineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}
