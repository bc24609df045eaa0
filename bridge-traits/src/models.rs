//! Domain values carried through data stores.
//!
//! The bridge treats these as opaque payloads: it moves them between threads
//! but never inspects them. Only data store implementations interpret fields
//! such as `next_fire_time` or `acquired_by`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

/// What to do when a schedule with the same id already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Replace the existing schedule
    Replace,
    /// Keep the existing schedule and drop the new one
    DoNothing,
    /// Fail with [`StoreError::ConflictingId`](crate::StoreError::ConflictingId)
    Exception,
}

/// A recurring unit of work that produces jobs when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub task_id: String,
    /// Trigger description, interpreted by the scheduler rather than the store.
    pub trigger: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub tags: BTreeSet<String>,
    /// `None` once the trigger is exhausted.
    pub next_fire_time: Option<DateTime<Utc>>,
    pub last_fire_time: Option<DateTime<Utc>>,
    pub acquired_by: Option<String>,
    pub acquired_until: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn new(id: impl Into<String>, task_id: impl Into<String>, trigger: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            trigger: trigger.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            tags: BTreeSet::new(),
            next_fire_time: None,
            last_fire_time: None,
            acquired_by: None,
            acquired_until: None,
        }
    }

    pub fn with_next_fire_time(mut self, time: DateTime<Utc>) -> Self {
        self.next_fire_time = Some(time);
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Whether the schedule is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire_time.is_some_and(|time| time <= now)
    }
}

/// A single execution request for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub task_id: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub schedule_id: Option<String>,
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub start_deadline: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub acquired_by: Option<String>,
    pub acquired_until: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a job with a fresh random id.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            schedule_id: None,
            scheduled_fire_time: None,
            start_deadline: None,
            tags: BTreeSet::new(),
            created_at: Utc::now(),
            started_at: None,
            acquired_by: None,
            acquired_until: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Marks the job as spawned by `schedule_id` firing at `fire_time`.
    pub fn from_schedule(mut self, schedule_id: impl Into<String>, fire_time: DateTime<Utc>) -> Self {
        self.schedule_id = Some(schedule_id.into());
        self.scheduled_fire_time = Some(fire_time);
        self
    }

    pub fn with_start_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.start_deadline = Some(deadline);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// How a job run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Error,
    MissedStartDeadline,
    Cancelled,
}

/// Result of a finished job, kept until fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub outcome: JobOutcome,
    pub exception: Option<String>,
    pub return_value: Option<Value>,
}

impl JobResult {
    pub fn success(job_id: Uuid, return_value: Value) -> Self {
        Self {
            job_id,
            outcome: JobOutcome::Success,
            exception: None,
            return_value: Some(return_value),
        }
    }

    pub fn failure(job_id: Uuid, exception: impl Into<String>) -> Self {
        Self {
            job_id,
            outcome: JobOutcome::Error,
            exception: Some(exception.into()),
            return_value: None,
        }
    }

    pub fn missed_start_deadline(job_id: Uuid) -> Self {
        Self {
            job_id,
            outcome: JobOutcome::MissedStartDeadline,
            exception: None,
            return_value: None,
        }
    }

    pub fn cancelled(job_id: Uuid) -> Self {
        Self {
            job_id,
            outcome: JobOutcome::Cancelled,
            exception: None,
            return_value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_schedule_is_due() {
        let now = Utc::now();
        let due = Schedule::new("s1", "task", "interval:60").with_next_fire_time(now);
        let later = Schedule::new("s2", "task", "interval:60")
            .with_next_fire_time(now + Duration::seconds(30));
        let exhausted = Schedule::new("s3", "task", "date");

        assert!(due.is_due(now));
        assert!(!later.is_due(now));
        assert!(!exhausted.is_due(now));
    }

    #[test]
    fn test_jobs_get_unique_ids() {
        let a = Job::new("task");
        let b = Job::new("task");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_job_serialization_round_trip() {
        let job = Job::new("send_email")
            .with_args(vec![json!("alice@example.com")])
            .with_kwarg("retries", json!(3))
            .with_tag("mail");

        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_conflict_policy_serialization() {
        assert_eq!(
            serde_json::to_string(&ConflictPolicy::DoNothing).unwrap(),
            "\"do_nothing\""
        );
    }
}
