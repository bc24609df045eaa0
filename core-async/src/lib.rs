//! Async primitives for driving blocking components from a cooperative loop.
//!
//! This crate wraps Tokio so that downstream crates never depend on it
//! directly, and adds the three building blocks of the sync-to-async bridge:
//!
//! - [`offload`]: run a blocking function on a worker thread while the calling
//!   task is suspended
//! - [`portal`]: let any thread run a callable on the loop thread and wait for
//!   its result
//! - [`scoped`]: borrow a resource whose acquire/release steps are blocking,
//!   with release always running exactly once
//!
//! # Modules
//!
//! - `task`: Task spawning and execution
//! - `time`: Time-related operations (sleep, timeout, duration, instant)
//! - `sync`: Synchronization primitives (Mutex, Semaphore, channels)
//! - `runtime`: Runtime construction and introspection
//!
//! # Examples
//!
//! ```rust
//! use core_async::offload::run_blocking;
//!
//! #[core_async::main]
//! async fn main() {
//!     let len = run_blocking(|| std::fs::read_dir(".").map(|d| d.count()))
//!         .await
//!         .unwrap();
//!     assert!(len.is_ok());
//! }
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

pub mod error;
pub mod offload;
pub mod portal;
pub mod runtime;
pub mod scoped;
pub mod sync;
pub mod task;
pub mod time;

pub use error::{BodyPanicked, OffloadError, PortalError};
pub use offload::{run_blocking, Offloader};
pub use portal::Portal;
pub use scoped::{with_resource, ScopeExit, ScopedResource};
pub use task::spawn;
pub use time::{sleep, Duration, Instant};
