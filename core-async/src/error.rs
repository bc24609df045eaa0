use thiserror::Error;

/// Failure to hand a blocking call to, or collect it from, the worker pool.
///
/// Errors raised by the offloaded function itself are never wrapped in this
/// type; they travel inside the function's own return value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffloadError {
    #[error("Offload requested outside of a runtime context")]
    NoRuntime,

    #[error("Offloaded call was cancelled before completion: {0}")]
    Cancelled(String),

    #[error("Offload limiter has been closed")]
    LimiterClosed,
}

/// Misuse or shutdown of a [`Portal`](crate::portal::Portal).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    #[error("Portal has not been opened")]
    NotOpen,

    #[error("Portal is already open")]
    AlreadyOpen,

    #[error("Portal has been closed")]
    Closed,

    #[error("Portal must be opened from within a runtime context")]
    NoRuntime,

    #[error("Async callables cannot be submitted from the portal's own loop thread")]
    ReentrantAsync,
}

/// Error context handed to a scoped resource's release step when the scope
/// body panicked. The panic itself is resumed after release returns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Scope body panicked: {message}")]
pub struct BodyPanicked {
    message: String,
}

impl BodyPanicked {
    pub(crate) fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
