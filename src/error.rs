/*!
 * Error Kinds and Result Alias
 *
 * This module defines the error kinds shared by the whole crate. Every
 * recoverable condition in the pipeline maps to one of these variants so
 * that callers can branch on the kind instead of parsing messages.
 */

use thiserror::Error;

/// Errors produced by the connection engine and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// Input violates a precondition; recovered locally with a user-visible
    /// reply on the originating connection
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lookup miss; surfaced as a normal protocol response
    #[error("not found")]
    NotFound,

    /// Subsystem is not initialized yet
    #[error("component is not ready")]
    NotReady,

    /// Per-connection framing buffer limit exceeded
    #[error("receive buffer limit exceeded")]
    BufferOverflow,

    /// Orderly remote close
    #[error("connection closed by remote end")]
    ConnectionClosed,

    /// Uniqueness violation (nickname in use, repository conflict)
    #[error("already defined")]
    AlreadyDefined,

    /// A bounded resource is exhausted (socket allocation, record cap)
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// Kernel call failed
    #[error("system error: {0}")]
    System(#[from] std::io::Error),

    /// Last-resort envelope caught at task boundaries
    #[error("unexpected: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True if the underlying system error is the non-blocking "try again"
    /// signal rather than a real failure
    pub fn is_would_block(&self) -> bool {
        matches!(
            self,
            Error::System(e) if e.kind() == std::io::ErrorKind::WouldBlock
        )
    }
}
