//! Error types for Lockbell
//!
//! `LockbellError` covers the whole taxonomy:
//! - `LockAcquisitionFailed` / `LockReleaseFailed` wrap the cause of a failed mutex operation
//! - `ChannelClosed` is a normal termination signal, not a failure
//! - `Transport` covers bus and store connectivity, including recovered listener panics
//! - `Context` carries caller cancellation and deadlines

use crate::context::ContextError;

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum LockbellError {
    #[error("failed to acquire lock '{key}': {source}")]
    LockAcquisitionFailed {
        key: String,
        #[source]
        source: Box<LockbellError>,
    },

    #[error("failed to release lock '{key}': {source}")]
    LockReleaseFailed {
        key: String,
        #[source]
        source: Box<LockbellError>,
    },

    #[error("not the lock owner")]
    NotOwner,

    #[error("lock still held after {0} attempts")]
    RetriesExhausted(u32),

    #[error("notification channel closed")]
    ChannelClosed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Context(#[from] ContextError),
}

pub type Result<T> = std::result::Result<T, LockbellError>;

impl LockbellError {
    pub fn acquisition_failed(key: impl Into<String>, cause: LockbellError) -> Self {
        LockbellError::LockAcquisitionFailed {
            key: key.into(),
            source: Box::new(cause),
        }
    }

    pub fn release_failed(key: impl Into<String>, cause: LockbellError) -> Self {
        LockbellError::LockReleaseFailed {
            key: key.into(),
            source: Box::new(cause),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        LockbellError::Transport(message.into())
    }

    /// The caller's own cancellation or deadline, if that is what ended the operation.
    ///
    /// Looks through `LockAcquisitionFailed` and `LockReleaseFailed` wrappers.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            LockbellError::Context(e) => Some(*e),
            LockbellError::LockAcquisitionFailed { source, .. }
            | LockbellError::LockReleaseFailed { source, .. } => source.context_error(),
            _ => None,
        }
    }

    pub fn is_channel_closed(&self) -> bool {
        matches!(self, LockbellError::ChannelClosed)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, LockbellError::Transport(_))
    }
}
