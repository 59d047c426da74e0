use thiserror::Error;

/// Coalescion service error.
///
/// Failures of the wrapped operation itself are never represented here, they are
/// part of the operation's value and reach every joined caller untouched.
#[derive(Clone, PartialEq, Eq, Debug, Hash, Error)]
pub enum Error {
    /// The operation was aborted (panicked or its runtime shut down) before it settled
    #[error("Operation aborted before it settled")]
    RecvError,
    /// Reached the `max_concurrent` amount of distinct operations running at once
    #[error("Max number of tasks running at once")]
    MaxConcurrent,
    /// The key strategy could not derive an identifier for the call
    #[error("Failed to derive coalescion key: {0}")]
    KeyDerivation(String),
}
