//! Subscriber table shared by the in-memory store.

use bridge_traits::{CallbackError, Event, EventCallback, EventKind, SubscriptionToken};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

struct Subscription {
    callback: EventCallback,
    event_types: Option<HashSet<EventKind>>,
}

#[derive(Default)]
pub(crate) struct Subscribers {
    table: Mutex<HashMap<SubscriptionToken, Subscription>>,
}

impl Subscribers {
    pub(crate) fn subscribe(
        &self,
        callback: EventCallback,
        event_types: Option<HashSet<EventKind>>,
    ) -> SubscriptionToken {
        let token = SubscriptionToken::new();
        self.lock().insert(
            token,
            Subscription {
                callback,
                event_types,
            },
        );
        debug!(token = %token, "subscriber registered");
        token
    }

    pub(crate) fn unsubscribe(&self, token: SubscriptionToken) {
        if self.lock().remove(&token).is_some() {
            debug!(token = %token, "subscriber removed");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Delivers `event` to every matching subscriber on the calling thread.
    ///
    /// The table lock is not held while callbacks run, so callbacks may
    /// subscribe, unsubscribe or call back into the store. A failing callback
    /// does not stop delivery to the others.
    pub(crate) fn publish(&self, event: &Event) -> Vec<CallbackError> {
        let targets: Vec<EventCallback> = self
            .lock()
            .values()
            .filter(|sub| event.matches(sub.event_types.as_ref()))
            .map(|sub| sub.callback.clone())
            .collect();

        let mut failures = Vec::new();
        for callback in targets {
            if let Err(err) = callback(event) {
                error!(event = ?event.kind(), error = %err, "subscriber callback failed");
                failures.push(err);
            }
        }
        failures
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionToken, Subscription>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::CallbackResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> EventCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_event: &Event| -> CallbackResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn removed() -> Event {
        Event::ScheduleRemoved {
            schedule_id: "s".into(),
        }
    }

    #[test]
    fn test_publish_respects_filters() {
        let subscribers = Subscribers::default();
        let all = Arc::new(AtomicUsize::new(0));
        let jobs_only = Arc::new(AtomicUsize::new(0));

        subscribers.subscribe(counting(&all), None);
        subscribers.subscribe(
            counting(&jobs_only),
            Some([EventKind::JobAdded].into_iter().collect()),
        );

        assert!(subscribers.publish(&removed()).is_empty());
        assert_eq!(all.load(Ordering::SeqCst), 1);
        assert_eq!(jobs_only.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let subscribers = Subscribers::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let token = subscribers.subscribe(counting(&hits), None);

        subscribers.publish(&removed());
        subscribers.unsubscribe(token);
        subscribers.publish(&removed());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(subscribers.len(), 0);
    }

    #[test]
    fn test_failing_callback_does_not_block_others() {
        let subscribers = Subscribers::default();
        let hits = Arc::new(AtomicUsize::new(0));
        subscribers.subscribe(Arc::new(|_event: &Event| -> CallbackResult {
            Err("refused".into())
        }), None);
        subscribers.subscribe(counting(&hits), None);

        let failures = subscribers.publish(&removed());

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].to_string(), "refused");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
