//! Async Data Store Contract
//!
//! [`AsyncDataStore`] mirrors [`DataStore`](crate::DataStore) operation for
//! operation for callers running on a cooperative loop. Arguments are owned
//! because they are shipped to worker threads.
//!
//! ## Scoped acquisition
//!
//! `acquire_schedules` takes the scope body as a closure receiving the claimed
//! schedules:
//!
//! ```ignore
//! use futures::FutureExt;
//!
//! let fired = store
//!     .acquire_schedules("scheduler-1", 10, |schedules| {
//!         async move {
//!             for schedule in schedules.iter_mut() {
//!                 schedule.last_fire_time = schedule.next_fire_time.take();
//!             }
//!             Ok(schedules.len())
//!         }
//!         .boxed()
//!     })
//!     .await?;
//! ```
//!
//! It resolves to `Ok(Some(value))` when the body succeeds, `Ok(None)` when the
//! body failed and the store's release phase suppressed the error, and the
//! body's own error otherwise.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use core_async::OffloadError;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{EventCallback, EventKind, SubscriptionToken};
use crate::models::{ConflictPolicy, Job, JobResult, Schedule};

/// Error that caused a store to be closed, forwarded to its exit phase.
pub type ErrorContext = Arc<dyn StdError + Send + Sync + 'static>;

#[async_trait]
pub trait AsyncDataStore: Send + Sync {
    type Error: StdError + From<StoreError> + From<OffloadError> + Send + Sync + 'static;

    /// Starts the store. Opening an already open store counts another entry.
    async fn open(&self) -> Result<(), Self::Error>;

    /// Shuts the store down once every entry has been closed. `error` is the failure that caused the shutdown,
    /// if any.
    async fn close(&self, error: Option<ErrorContext>) -> Result<(), Self::Error>;

    async fn get_schedules(&self, ids: Option<HashSet<String>>) -> Result<Vec<Schedule>, Self::Error>;

    async fn add_schedule(
        &self,
        schedule: Schedule,
        conflict_policy: ConflictPolicy,
    ) -> Result<(), Self::Error>;

    async fn remove_schedules(&self, ids: Vec<String>) -> Result<(), Self::Error>;

    async fn acquire_schedules<F, T>(
        &self,
        scheduler_id: &str,
        limit: usize,
        body: F,
    ) -> Result<Option<T>, Self::Error>
    where
        F: for<'a> FnOnce(&'a mut Vec<Schedule>) -> BoxFuture<'a, Result<T, Self::Error>>
            + Send
            + 'static,
        T: Send + 'static;

    async fn add_job(&self, job: Job) -> Result<(), Self::Error>;

    async fn get_jobs(&self, ids: Option<Vec<Uuid>>) -> Result<Vec<Job>, Self::Error>;

    async fn acquire_jobs(&self, worker_id: &str, limit: Option<usize>) -> Result<Vec<Job>, Self::Error>;

    async fn release_job(
        &self,
        worker_id: &str,
        job_id: Uuid,
        result: Option<JobResult>,
    ) -> Result<(), Self::Error>;

    async fn get_job_result(&self, job_id: Uuid) -> Result<Option<JobResult>, Self::Error>;

    /// Registration is forwarded directly; it is expected not to block.
    fn subscribe(
        &self,
        callback: EventCallback,
        event_types: Option<HashSet<EventKind>>,
    ) -> Result<SubscriptionToken, Self::Error>;

    fn unsubscribe(&self, token: SubscriptionToken) -> Result<(), Self::Error>;
}
