//! # Callback Portal
//!
//! A synchronous call-and-wait bridge into the cooperative loop. Code running on
//! any thread submits a callable; the callable runs on the loop thread and the
//! submitting thread blocks until the result (or panic) comes back.
//!
//! ## Architecture
//!
//! ```text
//!  worker thread ──call(f)──> bounded queue ──> server task (loop thread)
//!       ▲                                             │ runs f()
//!       └──────────────── oneshot result ─────────────┘
//! ```
//!
//! `open()` records the calling thread as the loop thread and spawns a single
//! server task that executes requests one at a time, so no two submitted
//! callables overlap. On a current-thread runtime that task runs on the loop
//! thread. On a multi-thread runtime requests are still serialised but may run
//! on any runtime worker; a warning is logged when opening there.
//!
//! ## Reentrancy
//!
//! A call made from the loop thread itself is detected and a synchronous
//! callable runs inline instead of being queued, which would otherwise
//! deadlock. An async callable submitted from the loop thread fails with
//! [`PortalError::ReentrantAsync`].
//!
//! ## Blocking
//!
//! Remote submissions use Tokio's `blocking_send`/`blocking_recv`. They must come
//! from threads that are not driving a runtime (blocking-pool threads and plain
//! OS threads are fine); submitting from an async worker thread of another
//! runtime panics.
//!
//! ## Usage
//!
//! ```rust
//! use core_async::portal::Portal;
//!
//! # core_async::runtime::block_on(async {
//! let portal = Portal::new();
//! portal.open().unwrap();
//!
//! let remote = portal.clone();
//! let value = core_async::task::spawn_blocking(move || remote.call(|| 40 + 2))
//!     .await
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(value, 42);
//!
//! portal.close().await.unwrap();
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

use crate::error::PortalError;
use crate::sync::{mpsc, oneshot};
use crate::task::JoinHandle;

/// Number of queued requests before remote submitters block.
pub const DEFAULT_PORTAL_CAPACITY: usize = 64;

enum Request {
    Sync(Box<dyn FnOnce() + Send>),
    Async(Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>),
}

enum PortalState {
    Idle,
    Open(OpenPortal),
    Closed,
}

struct OpenPortal {
    sender: mpsc::Sender<Request>,
    loop_thread: ThreadId,
    server: JoinHandle<()>,
}

enum Route {
    Inline,
    Remote(mpsc::Sender<Request>),
}

struct Inner {
    capacity: usize,
    state: Mutex<PortalState>,
}

/// Cross-thread call-and-wait bridge bound to one loop thread.
///
/// Cloning yields another handle to the same portal.
#[derive(Clone)]
pub struct Portal {
    inner: Arc<Inner>,
}

impl Portal {
    /// Creates a closed-for-business portal with the default queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PORTAL_CAPACITY)
    }

    /// Creates a portal whose request queue holds `capacity` pending calls.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                state: Mutex::new(PortalState::Idle),
            }),
        }
    }

    /// Binds the portal to the calling thread and starts serving requests.
    ///
    /// # Errors
    ///
    /// - [`PortalError::NoRuntime`] outside a Tokio runtime
    /// - [`PortalError::AlreadyOpen`] / [`PortalError::Closed`] on reuse
    pub fn open(&self) -> Result<(), PortalError> {
        let handle = Handle::try_current().map_err(|_| PortalError::NoRuntime)?;

        let mut state = self.lock_state();
        match *state {
            PortalState::Idle => {}
            PortalState::Open(_) => return Err(PortalError::AlreadyOpen),
            PortalState::Closed => return Err(PortalError::Closed),
        }

        if handle.runtime_flavor() != RuntimeFlavor::CurrentThread {
            warn!("portal opened on a multi-thread runtime; callables may run on any runtime worker");
        }

        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let server = handle.spawn(serve(receiver));
        let loop_thread = thread::current().id();

        *state = PortalState::Open(OpenPortal {
            sender,
            loop_thread,
            server,
        });

        info!(loop_thread = ?loop_thread, capacity = self.inner.capacity, "portal opened");
        Ok(())
    }

    /// Stops accepting calls, then waits for already queued calls to finish.
    ///
    /// # Errors
    ///
    /// [`PortalError::NotOpen`] if never opened, [`PortalError::Closed`] if
    /// already closed.
    pub async fn close(&self) -> Result<(), PortalError> {
        let open = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, PortalState::Closed) {
                PortalState::Open(open) => open,
                PortalState::Idle => {
                    *state = PortalState::Idle;
                    return Err(PortalError::NotOpen);
                }
                PortalState::Closed => return Err(PortalError::Closed),
            }
        };

        let OpenPortal { sender, server, .. } = open;
        drop(sender);

        if let Err(err) = server.await {
            warn!(error = %err, "portal server ended abnormally");
        }

        info!("portal closed");
        Ok(())
    }

    /// Returns `true` between a successful `open` and the start of `close`.
    pub fn is_open(&self) -> bool {
        matches!(*self.lock_state(), PortalState::Open(_))
    }

    /// Thread the portal is bound to, while open.
    pub fn loop_thread(&self) -> Option<ThreadId> {
        match &*self.lock_state() {
            PortalState::Open(open) => Some(open.loop_thread),
            _ => None,
        }
    }

    /// Runs `f` on the loop thread and blocks until it returns.
    ///
    /// From the loop thread itself `f` runs inline. A panic inside `f` is
    /// resumed on the calling thread.
    ///
    /// # Errors
    ///
    /// [`PortalError::NotOpen`] before `open`, [`PortalError::Closed`] once
    /// `close` has started.
    pub fn call<F, R>(&self, f: F) -> Result<R, PortalError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let sender = match self.route()? {
            Route::Inline => return Ok(f()),
            Route::Remote(sender) => sender,
        };

        let (tx, rx) = oneshot::channel();
        let request = Request::Sync(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(outcome);
        }));

        submit(sender, request, rx)
    }

    /// Runs the future produced by `f` on the loop thread and blocks until it
    /// resolves.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus [`PortalError::ReentrantAsync`] when
    /// invoked from the loop thread.
    pub fn call_async<F, Fut, R>(&self, f: F) -> Result<R, PortalError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let sender = match self.route()? {
            Route::Inline => return Err(PortalError::ReentrantAsync),
            Route::Remote(sender) => sender,
        };

        let (tx, rx) = oneshot::channel();
        let request = Request::Async(Box::new(move || {
            async move {
                let outcome = AssertUnwindSafe(async move { f().await })
                    .catch_unwind()
                    .await;
                let _ = tx.send(outcome);
            }
            .boxed()
        }));

        submit(sender, request, rx)
    }

    fn route(&self) -> Result<Route, PortalError> {
        match &*self.lock_state() {
            PortalState::Idle => Err(PortalError::NotOpen),
            PortalState::Closed => Err(PortalError::Closed),
            PortalState::Open(open) if open.loop_thread == thread::current().id() => {
                Ok(Route::Inline)
            }
            PortalState::Open(open) => Ok(Route::Remote(open.sender.clone())),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PortalState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Portal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.lock_state() {
            PortalState::Idle => "idle",
            PortalState::Open(_) => "open",
            PortalState::Closed => "closed",
        };
        f.debug_struct("Portal")
            .field("capacity", &self.inner.capacity)
            .field("state", &state)
            .finish()
    }
}

fn submit<R>(
    sender: mpsc::Sender<Request>,
    request: Request,
    rx: oneshot::Receiver<thread::Result<R>>,
) -> Result<R, PortalError> {
    debug!("submitting call to portal loop");
    sender
        .blocking_send(request)
        .map_err(|_| PortalError::Closed)?;
    drop(sender);

    match rx.blocking_recv() {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(payload)) => panic::resume_unwind(payload),
        Err(_) => Err(PortalError::Closed),
    }
}

async fn serve(mut receiver: mpsc::Receiver<Request>) {
    while let Some(request) = receiver.recv().await {
        match request {
            Request::Sync(job) => job(),
            Request::Async(job) => job().await,
        }
    }
    debug!("portal request queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn on_worker<T, F>(f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f).await.unwrap()
    }

    #[tokio::test]
    async fn test_call_runs_on_loop_thread() {
        let portal = Portal::new();
        portal.open().unwrap();
        let loop_thread = thread::current().id();

        let remote = portal.clone();
        let (caller, executed_on) = on_worker(move || {
            let executed_on = remote.call(|| thread::current().id()).unwrap();
            (thread::current().id(), executed_on)
        })
        .await;

        assert_ne!(caller, loop_thread);
        assert_eq!(executed_on, loop_thread);
        assert_eq!(portal.loop_thread(), Some(loop_thread));
        portal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_returns_error_values_unchanged() {
        let portal = Portal::new();
        portal.open().unwrap();

        let remote = portal.clone();
        let result = on_worker(move || {
            remote
                .call(|| "not-a-number".parse::<u32>())
                .unwrap()
        })
        .await;

        assert!(result.is_err());
        portal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_resumes_panic_on_caller_thread() {
        let portal = Portal::new();
        portal.open().unwrap();

        let remote = portal.clone();
        let payload = on_worker(move || {
            panic::catch_unwind(AssertUnwindSafe(|| remote.call(|| -> u8 { panic!("callback failed") })))
                .unwrap_err()
        })
        .await;

        assert_eq!(payload.downcast_ref::<&str>(), Some(&"callback failed"));
        assert!(portal.is_open());
        portal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_from_loop_thread_runs_inline() {
        let portal = Portal::new();
        portal.open().unwrap();

        let value = portal.call(|| thread::current().id()).unwrap();
        assert_eq!(value, thread::current().id());
        portal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_async_from_loop_thread_is_rejected() {
        let portal = Portal::new();
        portal.open().unwrap();

        let result = portal.call_async(|| async { 1 });
        assert_eq!(result, Err(PortalError::ReentrantAsync));
        portal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_async_awaits_on_loop_thread() {
        let portal = Portal::new();
        portal.open().unwrap();
        let loop_thread = thread::current().id();

        let remote = portal.clone();
        let executed_on = on_worker(move || {
            remote
                .call_async(|| async {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    thread::current().id()
                })
                .unwrap()
        })
        .await;

        assert_eq!(executed_on, loop_thread);
        portal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let portal = Portal::new();
        assert_eq!(portal.call(|| ()), Err(PortalError::NotOpen));
        assert_eq!(portal.close().await, Err(PortalError::NotOpen));

        portal.open().unwrap();
        assert_eq!(portal.open(), Err(PortalError::AlreadyOpen));

        portal.close().await.unwrap();
        assert_eq!(portal.call(|| ()), Err(PortalError::Closed));
        assert_eq!(portal.close().await, Err(PortalError::Closed));
        assert_eq!(portal.open(), Err(PortalError::Closed));
    }

    #[test]
    fn test_open_outside_runtime_fails() {
        let portal = Portal::new();
        assert_eq!(portal.open(), Err(PortalError::NoRuntime));
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_overlap() {
        const THREADS: usize = 8;
        const CALLS_PER_THREAD: usize = 25;

        let portal = Portal::with_capacity(4);
        portal.open().unwrap();

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..THREADS)
            .map(|_| {
                let portal = portal.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let executed = Arc::clone(&executed);
                thread::spawn(move || {
                    for i in 0..CALLS_PER_THREAD {
                        let active = Arc::clone(&active);
                        let peak = Arc::clone(&peak);
                        let executed = Arc::clone(&executed);
                        let echoed = portal
                            .call(move || {
                                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                executed.fetch_add(1, Ordering::SeqCst);
                                active.fetch_sub(1, Ordering::SeqCst);
                                i
                            })
                            .unwrap();
                        assert_eq!(echoed, i);
                    }
                })
            })
            .collect();

        on_worker(move || {
            for handle in threads {
                handle.join().unwrap();
            }
        })
        .await;

        assert_eq!(executed.load(Ordering::SeqCst), THREADS * CALLS_PER_THREAD);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        portal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_drains_queued_calls() {
        let portal = Portal::new();
        portal.open().unwrap();

        let executed = Arc::new(AtomicUsize::new(0));
        let (queued_tx, queued_rx) = oneshot::channel();

        let remote = portal.clone();
        let counter = Arc::clone(&executed);
        let worker = tokio::task::spawn_blocking(move || {
            let _ = queued_tx.send(());
            remote.call(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        queued_rx.await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        portal.close().await.unwrap();

        assert!(worker.await.unwrap().is_ok());
        assert_eq!(executed.load(Ordering::SeqCst), 1);
    }
}
