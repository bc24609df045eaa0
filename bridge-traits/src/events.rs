//! # Data Store Events
//!
//! Events published by a data store to its subscribers.
//!
//! Subscribers register an [`EventCallback`] together with an optional set of
//! [`EventKind`]s and receive an opaque [`SubscriptionToken`] to unsubscribe
//! with. A blocking store may invoke callbacks from any thread, possibly long
//! after registration; async façades therefore wrap callbacks before handing
//! them to the store so they run on the loop thread.
//!
//! A callback reports failure through its return value. The error goes back to
//! whichever thread published the event; stores decide what to do with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::JobOutcome;

/// Discriminant of [`Event`], used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ScheduleAdded,
    ScheduleUpdated,
    ScheduleRemoved,
    JobAdded,
    JobAcquired,
    JobReleased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    ScheduleAdded {
        schedule_id: String,
        next_fire_time: Option<DateTime<Utc>>,
    },
    ScheduleUpdated {
        schedule_id: String,
        next_fire_time: Option<DateTime<Utc>>,
    },
    ScheduleRemoved {
        schedule_id: String,
    },
    JobAdded {
        job_id: Uuid,
        task_id: String,
        schedule_id: Option<String>,
        tags: BTreeSet<String>,
    },
    JobAcquired {
        job_id: Uuid,
        worker_id: String,
    },
    JobReleased {
        job_id: Uuid,
        worker_id: String,
        outcome: Option<JobOutcome>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ScheduleAdded { .. } => EventKind::ScheduleAdded,
            Event::ScheduleUpdated { .. } => EventKind::ScheduleUpdated,
            Event::ScheduleRemoved { .. } => EventKind::ScheduleRemoved,
            Event::JobAdded { .. } => EventKind::JobAdded,
            Event::JobAcquired { .. } => EventKind::JobAcquired,
            Event::JobReleased { .. } => EventKind::JobReleased,
        }
    }

    /// Whether a subscriber registered with `filter` wants this event.
    /// `None` accepts everything.
    pub fn matches(&self, filter: Option<&HashSet<EventKind>>) -> bool {
        filter.map_or(true, |kinds| kinds.contains(&self.kind()))
    }
}

/// Error returned by a subscriber callback.
pub type CallbackError = Box<dyn StdError + Send + Sync + 'static>;

pub type CallbackResult = Result<(), CallbackError>;

/// Subscriber callback. May be invoked from any thread.
pub type EventCallback = Arc<dyn Fn(&Event) -> CallbackResult + Send + Sync + 'static>;

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionToken(Uuid);

impl SubscriptionToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removed(id: &str) -> Event {
        Event::ScheduleRemoved {
            schedule_id: id.to_string(),
        }
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(removed("a").kind(), EventKind::ScheduleRemoved);
        let acquired = Event::JobAcquired {
            job_id: Uuid::new_v4(),
            worker_id: "w1".into(),
        };
        assert_eq!(acquired.kind(), EventKind::JobAcquired);
    }

    #[test]
    fn test_event_filter() {
        let event = removed("a");
        let only_jobs: HashSet<_> = [EventKind::JobAdded].into_iter().collect();
        let schedules: HashSet<_> = [EventKind::ScheduleRemoved, EventKind::ScheduleAdded]
            .into_iter()
            .collect();

        assert!(event.matches(None));
        assert!(!event.matches(Some(&only_jobs)));
        assert!(event.matches(Some(&schedules)));
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(removed("nightly")).unwrap();
        assert_eq!(json["event"], "ScheduleRemoved");
        assert_eq!(json["schedule_id"], "nightly");
    }

    #[test]
    fn test_tokens_are_distinct() {
        assert_ne!(SubscriptionToken::new(), SubscriptionToken::new());
    }
}
