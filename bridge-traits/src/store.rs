//! Blocking Data Store Contract
//!
//! [`DataStore`] is the thread-based side of the bridge: every method runs to
//! completion on the calling thread and may block it for an unbounded time.
//! Implementations provide whatever internal locking they need; callers may
//! invoke methods concurrently from several threads.
//!
//! ## Lifecycle
//!
//! `enter` must succeed before other operations are used and `exit` is called
//! once at shutdown with the error (if any) that caused it.
//!
//! ## Scoped acquisition
//!
//! [`DataStore::acquire_schedules`] returns an un-entered two-phase resource.
//! Entering it claims up to `limit` due schedules; releasing it receives the
//! possibly-modified schedules back together with how the scope ended:
//!
//! ```ignore
//! use core_async::scoped::{ScopeExit, ScopedResource};
//!
//! let mut lease = store.acquire_schedules("scheduler-1", 10);
//! let mut schedules = lease.acquire()?;
//! for schedule in &mut schedules {
//!     schedule.next_fire_time = None;
//! }
//! lease.release(schedules, ScopeExit::Completed)?;
//! ```

use std::collections::HashSet;

use core_async::scoped::{ScopeExit, ScopedResource};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::events::{EventCallback, EventKind, SubscriptionToken};
use crate::models::{ConflictPolicy, Job, JobResult, Schedule};

/// Two-phase schedule claim returned by [`DataStore::acquire_schedules`].
pub type ScheduleLease =
    Box<dyn ScopedResource<Handle = Vec<Schedule>, Error = StoreError> + 'static>;

/// Blocking persistence for schedules, jobs and job results.
pub trait DataStore: Send + Sync + 'static {
    fn enter(&self) -> Result<()>;

    fn exit(&self, exit: ScopeExit<'_>) -> Result<()>;

    /// `None` returns every schedule; an empty set returns none.
    fn get_schedules(&self, ids: Option<&HashSet<String>>) -> Result<Vec<Schedule>>;

    fn add_schedule(&self, schedule: Schedule, conflict_policy: ConflictPolicy) -> Result<()>;

    /// Unknown ids are ignored.
    fn remove_schedules(&self, ids: &[String]) -> Result<()>;

    fn acquire_schedules(&self, scheduler_id: &str, limit: usize) -> ScheduleLease;

    fn add_job(&self, job: Job) -> Result<()>;

    /// `None` returns every job.
    fn get_jobs(&self, ids: Option<&[Uuid]>) -> Result<Vec<Job>>;

    /// Claims unclaimed jobs for `worker_id`; `None` means no limit.
    fn acquire_jobs(&self, worker_id: &str, limit: Option<usize>) -> Result<Vec<Job>>;

    fn release_job(&self, worker_id: &str, job_id: Uuid, result: Option<JobResult>) -> Result<()>;

    /// Returns the stored result and forgets it.
    fn get_job_result(&self, job_id: Uuid) -> Result<Option<JobResult>>;

    /// Registers `callback` for events whose kind is in `event_types`
    /// (`None` = all). Must not block.
    fn subscribe(
        &self,
        callback: EventCallback,
        event_types: Option<HashSet<EventKind>>,
    ) -> SubscriptionToken;

    /// Must not block. Unknown tokens are ignored.
    fn unsubscribe(&self, token: SubscriptionToken);
}
