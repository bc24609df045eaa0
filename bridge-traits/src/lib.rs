//! # Data Store Bridge Traits
//!
//! Contracts shared by blocking data stores and the async façade that drives
//! them from a cooperative loop.
//!
//! ## Overview
//!
//! A data store persists schedules, jobs and job results and publishes events
//! about changes. Stores are written as ordinary blocking code against
//! [`DataStore`]; async callers use [`AsyncDataStore`], which mirrors it
//! operation for operation.
//!
//! ## Traits
//!
//! - [`DataStore`](store::DataStore) - Blocking store, safe to call from any thread
//! - [`AsyncDataStore`](async_store::AsyncDataStore) - Async mirror for loop-side callers
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! Stores report failures with [`StoreError`](error::StoreError). Async
//! implementations define their own error type, which must convert from
//! `StoreError` so upstream errors pass through unchanged.
//!
//! ## Thread Safety
//!
//! `DataStore` requires `Send + Sync + 'static`: operations run on worker
//! threads, and subscriber callbacks may be invoked from any of them.

pub mod async_store;
pub mod error;
pub mod events;
pub mod models;
pub mod store;
pub mod time;

pub use error::{Result, StoreError};

// Re-export commonly used types
pub use async_store::{AsyncDataStore, ErrorContext};
pub use events::{CallbackError, CallbackResult, Event, EventCallback, EventKind, SubscriptionToken};
pub use models::{ConflictPolicy, Job, JobOutcome, JobResult, Schedule};
pub use store::{DataStore, ScheduleLease};
pub use time::{Clock, ManualClock, SystemClock};
