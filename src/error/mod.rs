use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;
use crate::store::StoreError;

/// Top-level error type for queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store is unreachable or an operation against it failed.
    /// Never retried silently by the core; the caller's next loop iteration
    /// is the only retry path.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// A record could not be encoded or decoded. Terminal and non-retryable
    /// for the affected message.
    #[error(transparent)]
    Serialization(#[from] CodecError),

    /// Lock acquisition gave up after the configured timeout. Non-fatal;
    /// callers back off and retry on their own loop iteration.
    #[error("timed out acquiring lock {key} after {waited:?}")]
    LockTimeout { key: String, waited: Duration },
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Failure signal returned by an application handler.
///
/// Only `Recoverable` drives the retry strategy; anything else is terminal
/// for the message.
#[derive(Debug, Error)]
pub enum HandlerFailure {
    #[error("recoverable handler failure: {0}")]
    Recoverable(String),

    #[error("handler failure: {0}")]
    Fatal(String),
}

impl HandlerFailure {
    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self::Recoverable(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable(_))
    }
}
