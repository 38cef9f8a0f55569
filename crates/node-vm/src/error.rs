//! Error types for the expression VM

use thiserror::Error;

/// Result type alias using VmError
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors raised while turning expression text into a program
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// Quote opened but never closed
    #[error("quote {0} not closed")]
    QuoteNotClosed(char),

    /// Bracket opened but never closed
    #[error("bracket {0} not closed")]
    BracketNotClosed(char),

    /// Closing bracket without a matching opening one
    #[error("unexpected closing bracket {0}")]
    UnexpectedClose(char),

    /// Character that starts no token
    #[error("unknown syntax")]
    UnknownSyntax,

    /// Parser error with a human readable message
    #[error("{0}")]
    Syntax(String),
}

impl VmError {
    /// Create a syntax error with a message
    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }
}
