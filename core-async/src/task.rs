//! Task spawning and execution abstractions.
//!
//! Thin re-exports of Tokio's task API so that downstream crates depend on
//! `core-async` only.
//!
//! - `spawn`: schedules a future on the current runtime
//! - `spawn_blocking`: runs a closure on the runtime's blocking pool; prefer
//!   [`crate::offload`] which adds panic propagation and back-pressure
//! - `yield_now`: cooperatively yields to the scheduler
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//!
//! # core_async::runtime::block_on(async {
//! let handle = task::spawn(async { 42 });
//! assert_eq!(handle.await.unwrap(), 42);
//! # });
//! ```

pub use tokio::task::{spawn_blocking, yield_now, JoinError, JoinHandle};

/// Spawns a new asynchronous task on the current runtime.
///
/// On a current-thread runtime the task runs on the loop thread.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;
