//! # Async Data Store Adapter
//!
//! Drives a blocking [`DataStore`] from a cooperative loop.
//!
//! ## Overview
//!
//! Every store operation is offloaded to the runtime's blocking pool, so the
//! loop keeps running other tasks while the store blocks. Callbacks registered
//! through the adapter are relayed onto the loop thread through a [`Portal`]
//! no matter which thread the store publishes from.
//!
//! ## Lifecycle
//!
//! `Created → Opening → Open → Closing → Closed`. Operations are accepted only
//! while `Open`. Opening starts the portal and then the store; closing stops
//! the store and then the portal, and the portal is closed even when the store
//! fails to stop.
//!
//! Entries nest: `open()` on an already open adapter only counts another entry,
//! and each `close()` gives one back. The store and portal are stopped by the
//! `close()` that matches the outermost `open()`; inner closes ignore their
//! error context.
//!
//! ## Cancellation
//!
//! Dropping the future of an in-flight operation detaches it: the blocking
//! call still runs to completion on its worker thread and its result is
//! discarded. A scope abandoned mid-body still releases its schedules.
//!
//! Opening and closing run as spawned tasks, so dropping their futures never
//! leaves the adapter half-way. An abandoned `close()` still stops the store
//! and the portal. An abandoned `open()` finishes starting and then gives its
//! entry back, stopping the store with `ScopeExit::Cancelled` when no other
//! entry holds it open.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_memory::MemoryDataStore;
//! use bridge_traits::{AsyncDataStore, Job};
//! use core_service::AsyncDataStoreAdapter;
//!
//! #[core_async::main]
//! async fn main() -> Result<(), core_service::AdapterError> {
//!     let adapter = AsyncDataStoreAdapter::new(MemoryDataStore::new());
//!     adapter.open().await?;
//!
//!     adapter.add_job(Job::new("send_report")).await?;
//!     let jobs = adapter.acquire_jobs("worker-1", Some(10)).await?;
//!
//!     adapter.close(None).await
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bridge_traits::{
    AsyncDataStore, CallbackResult, ConflictPolicy, DataStore, ErrorContext, Event,
    EventCallback, EventKind, Job, JobResult, Schedule, StoreError, SubscriptionToken,
};
use core_async::offload::Offloader;
use core_async::portal::Portal;
use core_async::runtime::Handle;
use core_async::scoped::{self, ScopeExit};
use core_async::sync::oneshot;
use core_async::OffloadError;
use core_runtime::config::BridgeConfig;
use futures::future::BoxFuture;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AdapterError, AdapterState, Result};

/// Async façade over a blocking [`DataStore`].
pub struct AsyncDataStoreAdapter<S: DataStore> {
    shared: Arc<Shared<S>>,
}

/// State reachable from the spawned open and close tasks.
struct Shared<S: DataStore> {
    store: Arc<S>,
    portal: Portal,
    offloader: Offloader,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Debug, Clone, Copy)]
struct Lifecycle {
    state: AdapterState,
    /// Outstanding entries while `Open`.
    depth: usize,
}

/// Why the store is being stopped.
enum Shutdown {
    Completed,
    Failed(ErrorContext),
    Cancelled,
}

impl Shutdown {
    fn as_exit(&self) -> ScopeExit<'_> {
        match self {
            Shutdown::Completed => ScopeExit::Completed,
            Shutdown::Failed(err) => ScopeExit::Failed(err.as_ref()),
            Shutdown::Cancelled => ScopeExit::Cancelled,
        }
    }
}

impl<S: DataStore> AsyncDataStoreAdapter<S> {
    /// Creates an adapter with the default [`BridgeConfig`].
    pub fn new(store: S) -> Self {
        Self::with_config(store, &BridgeConfig::default())
    }

    /// Creates an adapter whose offload limit and portal capacity follow
    /// `config`.
    pub fn with_config(store: S, config: &BridgeConfig) -> Self {
        Self::from_arc(Arc::new(store), config)
    }

    /// Creates an adapter over a store that is shared elsewhere.
    ///
    /// Zero sizes in an unvalidated `config` are raised to one.
    pub fn from_arc(store: Arc<S>, config: &BridgeConfig) -> Self {
        if let Err(err) = config.validate() {
            warn!(error = %err, "adapter built from an invalid bridge config");
        }
        Self {
            shared: Arc::new(Shared {
                store,
                portal: config.portal(),
                offloader: config.offloader(),
                lifecycle: Mutex::new(Lifecycle {
                    state: AdapterState::Created,
                    depth: 0,
                }),
            }),
        }
    }

    /// The wrapped blocking store.
    pub fn store(&self) -> &Arc<S> {
        &self.shared.store
    }

    pub fn state(&self) -> AdapterState {
        self.shared.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == AdapterState::Open
    }

    /// Number of `open()` calls not yet matched by a `close()`.
    pub fn entry_depth(&self) -> usize {
        self.shared.lock().depth
    }

    /// Opens the adapter, runs `body`, then closes it.
    ///
    /// An error from `body` is forwarded to the store's exit phase and
    /// returned in preference to any error raised while closing. Scopes nest.
    pub async fn scope<'a, F, Fut, T>(&'a self, body: F) -> Result<T>
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: Future<Output = Result<T>> + 'a,
    {
        self.open().await?;
        let outcome = body(self).await;

        let context = outcome
            .as_ref()
            .err()
            .map(|err| Arc::new(err.clone()) as ErrorContext);
        let closed = self.close(context).await;

        let value = outcome?;
        closed?;
        Ok(value)
    }

    /// Runs a store operation on a worker thread.
    async fn offload<F, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&S) -> bridge_traits::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_open()?;
        let store = Arc::clone(&self.shared.store);
        self.shared
            .offloader
            .run(move || operation(&store))
            .await?
            .map_err(AdapterError::from)
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            AdapterState::Open => Ok(()),
            state => Err(AdapterError::NotOpen { state }),
        }
    }
}

impl<S: DataStore> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: AdapterState) {
        self.lock().state = state;
    }

    fn set_open(&self) {
        let mut lifecycle = self.lock();
        lifecycle.state = AdapterState::Open;
        lifecycle.depth = 1;
    }

    /// Gives back one entry. Returns `true` when it was the last one, in which
    /// case the adapter is now `Closing`.
    fn leave(&self) -> std::result::Result<bool, AdapterState> {
        let mut lifecycle = self.lock();
        if lifecycle.state != AdapterState::Open {
            return Err(lifecycle.state);
        }
        lifecycle.depth = lifecycle.depth.saturating_sub(1);
        if lifecycle.depth > 0 {
            return Ok(false);
        }
        lifecycle.state = AdapterState::Closing;
        Ok(true)
    }

    /// Enters the store; the adapter ends `Open` on success and `Closed`
    /// otherwise.
    async fn start(self: Arc<Self>) -> Result<()> {
        let store = Arc::clone(&self.store);
        let entered = self
            .offloader
            .run(move || store.enter())
            .await
            .map_err(AdapterError::from)
            .and_then(|entered| entered.map_err(AdapterError::from));

        if let Err(err) = entered {
            warn!(error = %err, "data store failed to start; closing portal");
            if let Err(close_err) = self.portal.close().await {
                warn!(error = %close_err, "portal close after failed start");
            }
            self.set_state(AdapterState::Closed);
            return Err(err);
        }

        self.set_open();
        info!("adapter opened");
        Ok(())
    }

    /// Exits the store and closes the portal. The adapter ends `Closed`.
    async fn stop(self: Arc<Self>, reason: Shutdown) -> Result<()> {
        let store = Arc::clone(&self.store);
        let exited = self
            .offloader
            .run(move || store.exit(reason.as_exit()))
            .await;

        let portal_closed = self.portal.close().await;
        self.set_state(AdapterState::Closed);
        info!("adapter closed");

        exited?.map_err(AdapterError::from)?;
        portal_closed?;
        Ok(())
    }

    /// Gives back the entry of an `open()` whose caller went away.
    async fn abandon_entry(self: Arc<Self>) {
        if let Ok(true) = self.leave() {
            warn!("open abandoned by its caller; stopping data store");
            if let Err(err) = self.stop(Shutdown::Cancelled).await {
                warn!(error = %err, "stop after abandoned open failed");
            }
        }
    }
}

impl<S: DataStore> fmt::Debug for AsyncDataStoreAdapter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = *self.shared.lock();
        f.debug_struct("AsyncDataStoreAdapter")
            .field("state", &lifecycle.state)
            .field("depth", &lifecycle.depth)
            .field("portal", &self.shared.portal)
            .field("offloader", &self.shared.offloader)
            .finish_non_exhaustive()
    }
}

/// Outcome of a spawned start, waited on by `open()`.
///
/// If `open()` is dropped after the start succeeded but before the result was
/// read, the entry is given back from here.
struct PendingOpen<S: DataStore> {
    shared: Arc<Shared<S>>,
    receiver: Option<oneshot::Receiver<Result<()>>>,
}

impl<S: DataStore> PendingOpen<S> {
    async fn wait(&mut self) -> Result<()> {
        let received = match self.receiver.as_mut() {
            Some(receiver) => receiver.await,
            None => return Err(OffloadError::Cancelled("start already collected".to_string()).into()),
        };
        self.receiver = None;
        received.unwrap_or_else(|_| {
            Err(OffloadError::Cancelled("start task ended without a result".to_string()).into())
        })
    }
}

impl<S: DataStore> Drop for PendingOpen<S> {
    fn drop(&mut self) {
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };
        receiver.close();
        if let Ok(Ok(())) = receiver.try_recv() {
            let shared = Arc::clone(&self.shared);
            match Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(shared.abandon_entry());
                }
                Err(_) => warn!("open abandoned outside a runtime; adapter left open"),
            }
        }
    }
}

#[async_trait]
impl<S: DataStore> AsyncDataStore for AsyncDataStoreAdapter<S> {
    type Error = AdapterError;

    #[instrument(skip(self))]
    async fn open(&self) -> Result<()> {
        {
            let mut lifecycle = self.shared.lock();
            let current = lifecycle.state;
            match current {
                AdapterState::Open => {
                    lifecycle.depth += 1;
                    debug!(depth = lifecycle.depth, "nested open");
                    return Ok(());
                }
                AdapterState::Created => lifecycle.state = AdapterState::Opening,
                state => return Err(AdapterError::CannotOpen { state }),
            }
        }

        if let Err(err) = self.shared.portal.open() {
            self.shared.set_state(AdapterState::Created);
            return Err(err.into());
        }

        let (started_tx, started_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        core_async::spawn(async move {
            let started = Arc::clone(&shared).start().await;
            if let Err(Ok(())) = started_tx.send(started) {
                shared.abandon_entry().await;
            }
        });

        let mut pending = PendingOpen {
            shared: Arc::clone(&self.shared),
            receiver: Some(started_rx),
        };
        pending.wait().await
    }

    #[instrument(skip(self, error), fields(failed = error.is_some()))]
    async fn close(&self, error: Option<ErrorContext>) -> Result<()> {
        let last = self
            .shared
            .leave()
            .map_err(|state| AdapterError::NotOpen { state })?;
        if !last {
            debug!(depth = self.entry_depth(), "nested close; adapter stays open");
            return Ok(());
        }

        let reason = match error {
            Some(err) => Shutdown::Failed(err),
            None => Shutdown::Completed,
        };
        match core_async::spawn(Arc::clone(&self.shared).stop(reason)).await {
            Ok(stopped) => stopped,
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            Err(err) => Err(OffloadError::Cancelled(err.to_string()).into()),
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_schedules(&self, ids: Option<HashSet<String>>) -> Result<Vec<Schedule>> {
        self.offload(move |store| store.get_schedules(ids.as_ref()))
            .await
    }

    #[instrument(level = "debug", skip(self, schedule), fields(schedule_id = %schedule.id))]
    async fn add_schedule(&self, schedule: Schedule, conflict_policy: ConflictPolicy) -> Result<()> {
        self.offload(move |store| store.add_schedule(schedule, conflict_policy))
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn remove_schedules(&self, ids: Vec<String>) -> Result<()> {
        self.offload(move |store| store.remove_schedules(&ids)).await
    }

    #[instrument(level = "debug", skip(self, body))]
    async fn acquire_schedules<F, T>(
        &self,
        scheduler_id: &str,
        limit: usize,
        body: F,
    ) -> Result<Option<T>>
    where
        F: for<'a> FnOnce(&'a mut Vec<Schedule>) -> BoxFuture<'a, Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_open()?;
        let lease = self.shared.store.acquire_schedules(scheduler_id, limit);
        let scope: BoxFuture<'_, Result<Option<T>>> =
            Box::pin(scoped::with_resource(&self.shared.offloader, lease, body));
        let outcome = scope.await;
        if let Ok(None) = outcome {
            debug!("scope error suppressed by the store");
        }
        outcome
    }

    #[instrument(level = "debug", skip(self, job), fields(job_id = %job.id))]
    async fn add_job(&self, job: Job) -> Result<()> {
        self.offload(move |store| store.add_job(job)).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_jobs(&self, ids: Option<Vec<Uuid>>) -> Result<Vec<Job>> {
        self.offload(move |store| store.get_jobs(ids.as_deref())).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn acquire_jobs(&self, worker_id: &str, limit: Option<usize>) -> Result<Vec<Job>> {
        let worker_id = worker_id.to_string();
        self.offload(move |store| store.acquire_jobs(&worker_id, limit))
            .await
    }

    #[instrument(level = "debug", skip(self, result))]
    async fn release_job(
        &self,
        worker_id: &str,
        job_id: Uuid,
        result: Option<JobResult>,
    ) -> Result<()> {
        let worker_id = worker_id.to_string();
        self.offload(move |store| store.release_job(&worker_id, job_id, result))
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_job_result(&self, job_id: Uuid) -> Result<Option<JobResult>> {
        self.offload(move |store| store.get_job_result(job_id)).await
    }

    /// Registers `callback` so that every invocation runs on the loop thread.
    ///
    /// The store may publish from any thread. The publishing thread blocks
    /// until the callback has run on the loop and receives its result; after
    /// the adapter closes, relayed invocations fail with a portal error.
    fn subscribe(
        &self,
        callback: EventCallback,
        event_types: Option<HashSet<EventKind>>,
    ) -> Result<SubscriptionToken> {
        self.ensure_open()?;

        let portal = self.shared.portal.clone();
        let relay: EventCallback = Arc::new(move |event: &Event| -> CallbackResult {
            let callback = Arc::clone(&callback);
            let event = event.clone();
            portal.call(move || callback(&event))?
        });

        let token = self.shared.store.subscribe(relay, event_types);
        debug!(token = %token, "callback subscribed through portal");
        Ok(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        self.ensure_open()?;
        self.shared.store.unsubscribe(token);
        Ok(())
    }
}

impl PartialEq<StoreError> for AdapterError {
    fn eq(&self, other: &StoreError) -> bool {
        self.as_store_error() == Some(other)
    }
}
