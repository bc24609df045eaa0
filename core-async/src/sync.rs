//! Synchronization primitives.
//!
//! Re-exports of `tokio::sync`. All primitives are `Send + Sync`; the channel
//! halves additionally offer `blocking_*` methods for use from worker threads
//! that are not driving the runtime, which is how the portal hands work to
//! the loop thread.

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedSemaphorePermit, RwLock,
    Semaphore, SemaphorePermit,
};
