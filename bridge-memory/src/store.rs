//! In-memory [`DataStore`] implementation.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bridge_traits::{
    CallbackError, Clock, ConflictPolicy, DataStore, Event, EventCallback, EventKind, Job,
    JobResult, Result, Schedule, ScheduleLease, StoreError, SubscriptionToken, SystemClock,
};
use chrono::Duration;
use core_async::scoped::ScopeExit;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::claim::ScheduleClaim;
use crate::subscribers::Subscribers;

/// Seconds a claim on a schedule or job stays valid unless released.
pub const DEFAULT_LOCK_EXPIRATION_SECS: i64 = 30;

#[derive(Default)]
pub(crate) struct StoreState {
    pub(crate) running: bool,
    pub(crate) schedules: HashMap<String, Schedule>,
    pub(crate) jobs: Vec<Job>,
    pub(crate) job_results: HashMap<Uuid, JobResult>,
}

pub(crate) struct Inner {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) lock_expiration_delay: Duration,
    state: Mutex<StoreState>,
    subscribers: Subscribers,
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the state, failing if the store has not been entered.
    pub(crate) fn lock_running(&self) -> Result<MutexGuard<'_, StoreState>> {
        let state = self.lock();
        if !state.running {
            return Err(StoreError::Lifecycle("data store is not running".to_string()));
        }
        Ok(state)
    }

    /// Must be called after the state lock has been released.
    pub(crate) fn publish_all(&self, events: Vec<Event>) {
        for event in &events {
            // Failures are logged by the subscriber table.
            let _ = self.subscribers.publish(event);
        }
    }
}

/// Blocking data store keeping everything in process memory.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct MemoryDataStore {
    inner: Arc<Inner>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                lock_expiration_delay: Duration::seconds(DEFAULT_LOCK_EXPIRATION_SECS),
                state: Mutex::new(StoreState::default()),
                subscribers: Subscribers::default(),
            }),
        }
    }

    /// Sets how long claims stay valid. Has no effect once the store has
    /// been cloned.
    pub fn with_lock_expiration_delay(mut self, delay: Duration) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.lock_expiration_delay = delay,
            None => warn!("lock expiration delay ignored: store is already shared"),
        }
        self
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Delivers `event` to matching subscribers on the calling thread and
    /// returns the errors raised by callbacks.
    pub fn publish(&self, event: &Event) -> Vec<CallbackError> {
        self.inner.subscribers.publish(event)
    }
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryDataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MemoryDataStore")
            .field("running", &state.running)
            .field("schedules", &state.schedules.len())
            .field("jobs", &state.jobs.len())
            .field("job_results", &state.job_results.len())
            .finish()
    }
}

/// Schedules with a fire time first, earliest first, then by id.
fn fire_order(a: &Schedule, b: &Schedule) -> Ordering {
    match (a.next_fire_time, b.next_fire_time) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

pub(crate) fn sorted_by_fire_time<'a>(schedules: impl Iterator<Item = &'a Schedule>) -> Vec<&'a Schedule> {
    let mut sorted: Vec<&Schedule> = schedules.collect();
    sorted.sort_by(|a, b| fire_order(a, b));
    sorted
}

impl DataStore for MemoryDataStore {
    fn enter(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if state.running {
            return Err(StoreError::Lifecycle("data store already entered".to_string()));
        }
        state.running = true;
        info!("memory data store started");
        Ok(())
    }

    fn exit(&self, exit: ScopeExit<'_>) -> Result<()> {
        let mut state = self.inner.lock();
        if !state.running {
            return Err(StoreError::Lifecycle("data store is not running".to_string()));
        }
        state.running = false;
        match exit.error() {
            Some(err) => warn!(error = %err, "memory data store stopped after failure"),
            None => info!(exit = %exit, "memory data store stopped"),
        }
        Ok(())
    }

    fn get_schedules(&self, ids: Option<&HashSet<String>>) -> Result<Vec<Schedule>> {
        let state = self.inner.lock_running()?;
        let selected = state
            .schedules
            .values()
            .filter(|schedule| ids.map_or(true, |ids| ids.contains(&schedule.id)));
        Ok(sorted_by_fire_time(selected).into_iter().cloned().collect())
    }

    fn add_schedule(&self, schedule: Schedule, conflict_policy: ConflictPolicy) -> Result<()> {
        let event = {
            let mut state = self.inner.lock_running()?;
            let event = if state.schedules.contains_key(&schedule.id) {
                match conflict_policy {
                    ConflictPolicy::Exception => {
                        return Err(StoreError::ConflictingId(schedule.id));
                    }
                    ConflictPolicy::DoNothing => {
                        debug!(schedule_id = %schedule.id, "schedule exists, keeping the old one");
                        return Ok(());
                    }
                    ConflictPolicy::Replace => Event::ScheduleUpdated {
                        schedule_id: schedule.id.clone(),
                        next_fire_time: schedule.next_fire_time,
                    },
                }
            } else {
                Event::ScheduleAdded {
                    schedule_id: schedule.id.clone(),
                    next_fire_time: schedule.next_fire_time,
                }
            };
            debug!(schedule_id = %schedule.id, "schedule stored");
            state.schedules.insert(schedule.id.clone(), schedule);
            event
        };

        self.inner.publish_all(vec![event]);
        Ok(())
    }

    fn remove_schedules(&self, ids: &[String]) -> Result<()> {
        let events: Vec<Event> = {
            let mut state = self.inner.lock_running()?;
            ids.iter()
                .filter_map(|id| state.schedules.remove(id))
                .map(|schedule| Event::ScheduleRemoved {
                    schedule_id: schedule.id,
                })
                .collect()
        };

        debug!(removed = events.len(), "schedules removed");
        self.inner.publish_all(events);
        Ok(())
    }

    fn acquire_schedules(&self, scheduler_id: &str, limit: usize) -> ScheduleLease {
        Box::new(ScheduleClaim::new(
            Arc::clone(&self.inner),
            scheduler_id.to_string(),
            limit,
        ))
    }

    fn add_job(&self, job: Job) -> Result<()> {
        let event = {
            let mut state = self.inner.lock_running()?;
            if state.jobs.iter().any(|existing| existing.id == job.id) {
                return Err(StoreError::ConflictingId(job.id.to_string()));
            }
            let event = Event::JobAdded {
                job_id: job.id,
                task_id: job.task_id.clone(),
                schedule_id: job.schedule_id.clone(),
                tags: job.tags.clone(),
            };
            debug!(job_id = %job.id, task_id = %job.task_id, "job stored");
            state.jobs.push(job);
            event
        };

        self.inner.publish_all(vec![event]);
        Ok(())
    }

    fn get_jobs(&self, ids: Option<&[Uuid]>) -> Result<Vec<Job>> {
        let state = self.inner.lock_running()?;
        Ok(state
            .jobs
            .iter()
            .filter(|job| ids.map_or(true, |ids| ids.contains(&job.id)))
            .cloned()
            .collect())
    }

    fn acquire_jobs(&self, worker_id: &str, limit: Option<usize>) -> Result<Vec<Job>> {
        let now = self.inner.clock.now();
        let acquired_until = now + self.inner.lock_expiration_delay;
        let mut events = Vec::new();

        let acquired = {
            let mut state = self.inner.lock_running()?;
            let state = &mut *state;
            let mut acquired = Vec::new();
            let mut missed = Vec::new();

            for job in state.jobs.iter_mut() {
                if limit.is_some_and(|limit| acquired.len() >= limit) {
                    break;
                }
                let claimed = job.acquired_by.is_some()
                    && job.acquired_until.is_some_and(|until| until >= now);
                if claimed {
                    continue;
                }
                if job.start_deadline.is_some_and(|deadline| deadline < now) {
                    missed.push(job.id);
                    continue;
                }

                job.acquired_by = Some(worker_id.to_string());
                job.acquired_until = Some(acquired_until);
                events.push(Event::JobAcquired {
                    job_id: job.id,
                    worker_id: worker_id.to_string(),
                });
                acquired.push(job.clone());
            }

            for job_id in missed {
                state.jobs.retain(|job| job.id != job_id);
                let result = JobResult::missed_start_deadline(job_id);
                events.push(Event::JobReleased {
                    job_id,
                    worker_id: worker_id.to_string(),
                    outcome: Some(result.outcome),
                });
                state.job_results.insert(job_id, result);
                debug!(job_id = %job_id, "job missed its start deadline");
            }
            acquired
        };

        debug!(worker_id, acquired = acquired.len(), "jobs acquired");
        self.inner.publish_all(events);
        Ok(acquired)
    }

    fn release_job(&self, worker_id: &str, job_id: Uuid, result: Option<JobResult>) -> Result<()> {
        let event = {
            let mut state = self.inner.lock_running()?;
            let index = state
                .jobs
                .iter()
                .position(|job| job.id == job_id)
                .ok_or(StoreError::JobNotFound(job_id))?;
            if state.jobs[index].acquired_by.as_deref() != Some(worker_id) {
                return Err(StoreError::NotAcquired {
                    job_id,
                    worker_id: worker_id.to_string(),
                });
            }

            state.jobs.remove(index);
            let outcome = result.as_ref().map(|result| result.outcome);
            if let Some(result) = result {
                state.job_results.insert(job_id, result);
            }
            Event::JobReleased {
                job_id,
                worker_id: worker_id.to_string(),
                outcome,
            }
        };

        debug!(worker_id, job_id = %job_id, "job released");
        self.inner.publish_all(vec![event]);
        Ok(())
    }

    fn get_job_result(&self, job_id: Uuid) -> Result<Option<JobResult>> {
        let mut state = self.inner.lock_running()?;
        Ok(state.job_results.remove(&job_id))
    }

    fn subscribe(
        &self,
        callback: EventCallback,
        event_types: Option<HashSet<EventKind>>,
    ) -> SubscriptionToken {
        self.inner.subscribers.subscribe(callback, event_types)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.inner.subscribers.unsubscribe(token);
    }
}
