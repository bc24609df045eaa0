//! Two-phase schedule claim handed out by `MemoryDataStore::acquire_schedules`.

use std::sync::Arc;

use bridge_traits::{Event, Schedule, StoreError};
use core_async::scoped::{ScopeExit, ScopedResource};
use tracing::debug;

use crate::store::{sorted_by_fire_time, Inner};

pub(crate) struct ScheduleClaim {
    inner: Arc<Inner>,
    scheduler_id: String,
    limit: usize,
}

impl ScheduleClaim {
    pub(crate) fn new(inner: Arc<Inner>, scheduler_id: String, limit: usize) -> Self {
        Self {
            inner,
            scheduler_id,
            limit,
        }
    }
}

impl ScopedResource for ScheduleClaim {
    type Handle = Vec<Schedule>;
    type Error = StoreError;

    /// Claims up to `limit` due schedules that nobody else holds, earliest
    /// first.
    fn acquire(&mut self) -> Result<Vec<Schedule>, StoreError> {
        let now = self.inner.clock.now();
        let acquired_until = now + self.inner.lock_expiration_delay;
        let mut state = self.inner.lock_running()?;

        let ids: Vec<String> = sorted_by_fire_time(state.schedules.values().filter(|schedule| {
            let held = schedule.acquired_by.is_some()
                && schedule.acquired_until.is_some_and(|until| until >= now);
            schedule.is_due(now) && !held
        }))
        .into_iter()
        .take(self.limit)
        .map(|schedule| schedule.id.clone())
        .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(schedule) = state.schedules.get_mut(&id) {
                schedule.acquired_by = Some(self.scheduler_id.clone());
                schedule.acquired_until = Some(acquired_until);
                claimed.push(schedule.clone());
            }
        }

        debug!(
            scheduler_id = %self.scheduler_id,
            claimed = claimed.len(),
            "schedules claimed"
        );
        Ok(claimed)
    }

    /// On completion the returned schedules replace the stored ones, and
    /// schedules without a next fire time are removed. Otherwise the claims are
    /// dropped and the stored schedules are left as they were.
    fn release(&mut self, schedules: Vec<Schedule>, exit: ScopeExit<'_>) -> Result<bool, StoreError> {
        let mut events = Vec::new();
        {
            let mut state = self.inner.lock();
            for mut schedule in schedules {
                let owned = state
                    .schedules
                    .get(&schedule.id)
                    .is_some_and(|stored| stored.acquired_by.as_deref() == Some(self.scheduler_id.as_str()));
                if !owned {
                    continue;
                }

                if !exit.is_completed() {
                    if let Some(stored) = state.schedules.get_mut(&schedule.id) {
                        stored.acquired_by = None;
                        stored.acquired_until = None;
                    }
                    continue;
                }

                schedule.acquired_by = None;
                schedule.acquired_until = None;
                if schedule.next_fire_time.is_none() {
                    state.schedules.remove(&schedule.id);
                    events.push(Event::ScheduleRemoved {
                        schedule_id: schedule.id,
                    });
                } else {
                    events.push(Event::ScheduleUpdated {
                        schedule_id: schedule.id.clone(),
                        next_fire_time: schedule.next_fire_time,
                    });
                    state.schedules.insert(schedule.id.clone(), schedule);
                }
            }
        }

        debug!(scheduler_id = %self.scheduler_id, exit = %exit, "schedule claims released");
        self.inner.publish_all(events);
        Ok(false)
    }
}
