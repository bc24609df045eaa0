use bridge_traits::{ErrorContext, StoreError};
use core_async::{OffloadError, PortalError};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle of an [`AsyncDataStoreAdapter`](crate::AsyncDataStoreAdapter).
///
/// `Closed` is terminal; a closed adapter is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    Created,
    Opening,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterState::Created => "created",
            AdapterState::Opening => "opening",
            AdapterState::Open => "open",
            AdapterState::Closing => "closing",
            AdapterState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    /// Raised by the blocking store, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Offload failed: {0}")]
    Offload(#[from] OffloadError),

    #[error("Callback portal error: {0}")]
    Portal(#[from] PortalError),

    #[error("Adapter is not open (state: {state})")]
    NotOpen { state: AdapterState },

    #[error("Adapter cannot be opened (state: {state})")]
    CannotOpen { state: AdapterState },

    /// Raised by caller code running inside a scope.
    #[error(transparent)]
    Scope(ErrorContext),
}

impl AdapterError {
    /// Wraps an arbitrary error raised inside an acquisition scope.
    pub fn scope<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        AdapterError::Scope(Arc::new(err))
    }

    /// The store error, if this error came from the blocking store.
    pub fn as_store_error(&self) -> Option<&StoreError> {
        match self {
            AdapterError::Store(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
