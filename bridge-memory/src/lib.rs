//! # In-Memory Data Store
//!
//! A blocking [`DataStore`](bridge_traits::DataStore) that keeps schedules,
//! jobs and job results in process memory. Every operation takes a single
//! internal lock, so the store can be driven from any number of worker
//! threads. Events are delivered on the thread that caused them, after the
//! lock has been released.
//!
//! Claims on schedules and jobs expire after a configurable delay
//! (30 seconds by default) so work held by a crashed scheduler or worker is
//! picked up again.
//!
//! ```ignore
//! use bridge_memory::MemoryDataStore;
//! use bridge_traits::{DataStore, Job};
//!
//! let store = MemoryDataStore::new();
//! store.enter()?;
//! store.add_job(Job::new("send_report"))?;
//! let jobs = store.acquire_jobs("worker-1", Some(10))?;
//! ```

mod claim;
mod store;
mod subscribers;

pub use store::{MemoryDataStore, DEFAULT_LOCK_EXPIRATION_SECS};
