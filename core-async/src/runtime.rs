//! Runtime utilities that abstract over the underlying async executor.
//!
//! Downstream crates never construct Tokio runtimes directly. The cooperative
//! loop this workspace is built around is a current-thread runtime: every task
//! spawned on it runs on the thread that drives `block_on`, while blocking work
//! is handed to the runtime's bounded blocking pool.

use std::thread::{self, ThreadId};

pub use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};

/// Runs the provided future to completion on a fresh current-thread runtime.
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on: failed to build Tokio runtime")
        .block_on(future)
}

/// Runs the provided future to completion on a fresh multi-thread runtime.
pub fn block_on_multi_thread<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on_multi_thread: failed to build Tokio runtime")
        .block_on(future)
}

/// Returns `true` when called from inside a current-thread runtime.
pub fn is_cooperative_loop() -> bool {
    Handle::try_current()
        .map(|handle| handle.runtime_flavor() == RuntimeFlavor::CurrentThread)
        .unwrap_or(false)
}

/// Identifier of the calling thread.
pub fn current_thread_id() -> ThreadId {
    thread::current().id()
}
