//! Error types
//!
//! Every fallible operation reports synchronously through [`Result`].
//! Timeouts are not errors: waits return [`WaitStatus::Timeout`].
//!
//! [`WaitStatus::Timeout`]: crate::handle::WaitStatus::Timeout

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by handle, thread and collection operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Null, closed or wrong-kind handle passed to an operation
    #[error("invalid handle")]
    InvalidHandle,

    /// Malformed argument
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The underlying wait primitive failed (distinct from a timeout)
    #[error("wait failed: {0}")]
    WaitFailed(String),

    /// Allocation or native resource creation failed
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Mutex released by a thread that does not own it
    #[error("attempt to release mutex not owned by caller")]
    NotOwner,

    /// Semaphore release would exceed its maximum count
    #[error("too many posts to semaphore")]
    TooManyPosts,

    /// Operation not available for this object or platform
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::ResourceExhausted(e.to_string())
    }
}
