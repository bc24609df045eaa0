//! # Worker Offloading
//!
//! Runs blocking functions on the runtime's blocking pool while the awaiting
//! task is suspended, so the cooperative loop keeps scheduling other tasks.
//!
//! ## Semantics
//!
//! - The function's return value is handed back untouched. A blocking call that
//!   returns `Err(e)` surfaces as `Ok(Err(e))`; the outer [`OffloadError`] only
//!   reports hand-off failures.
//! - A panic on the worker thread is resumed in the awaiting task with the
//!   original payload.
//! - Cancellation detaches: dropping the returned future stops the wait, not the
//!   work. The blocking call runs to completion and its result is discarded.
//! - With a concurrency limit, a permit is taken before hand-off and held by the
//!   worker until the blocking call returns, so detached calls still count
//!   against the limit.
//!
//! ## Usage
//!
//! ```rust
//! use core_async::offload::Offloader;
//!
//! # core_async::runtime::block_on(async {
//! let offloader = Offloader::with_limit(4);
//! let sum = offloader.run(|| (1..=10).sum::<u32>()).await.unwrap();
//! assert_eq!(sum, 55);
//! # });
//! ```

use std::panic;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::OffloadError;
use crate::sync::Semaphore;

/// Hands blocking work to the ambient runtime's blocking pool.
///
/// Cheap to clone; clones share the same concurrency limit.
#[derive(Debug, Clone, Default)]
pub struct Offloader {
    limiter: Option<Arc<Semaphore>>,
}

impl Offloader {
    /// Offloader bounded only by the runtime's blocking pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offloader allowing at most `max_concurrent` blocking calls in flight.
    ///
    /// Callers beyond the limit wait asynchronously for a permit. A limit of
    /// zero is raised to one.
    pub fn with_limit(max_concurrent: usize) -> Self {
        if max_concurrent == 0 {
            warn!("offload limit of 0 would block every call; using 1");
        }
        Self {
            limiter: Some(Arc::new(Semaphore::new(max_concurrent.max(1)))),
        }
    }

    /// Builds an offloader from an optional limit.
    pub fn from_limit(max_concurrent: Option<usize>) -> Self {
        max_concurrent.map(Self::with_limit).unwrap_or_default()
    }

    /// Permits currently available, or `None` when unbounded.
    pub fn available_permits(&self) -> Option<usize> {
        self.limiter.as_ref().map(|sem| sem.available_permits())
    }

    /// Runs `f` on a worker thread and returns its result.
    ///
    /// # Errors
    ///
    /// - [`OffloadError::NoRuntime`] when called outside a Tokio runtime
    /// - [`OffloadError::LimiterClosed`] if the concurrency limiter was closed
    /// - [`OffloadError::Cancelled`] if the runtime shut down before the call ran
    pub async fn run<F, T>(&self, f: F) -> Result<T, OffloadError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| OffloadError::NoRuntime)?;

        let permit = match &self.limiter {
            Some(limiter) => Some(
                Arc::clone(limiter)
                    .acquire_owned()
                    .await
                    .map_err(|_| OffloadError::LimiterClosed)?,
            ),
            None => None,
        };

        debug!("offloading blocking call");
        let join = handle.spawn_blocking(move || {
            let _permit = permit;
            f()
        });

        let mut detach = DetachNotice::armed();
        let joined = join.await;
        detach.disarm();

        match joined {
            Ok(value) => Ok(value),
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            Err(err) => Err(OffloadError::Cancelled(err.to_string())),
        }
    }
}

/// Runs `f` on the blocking pool without a concurrency limit.
pub async fn run_blocking<F, T>(f: F) -> Result<T, OffloadError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Offloader::new().run(f).await
}

/// Logs when an awaiting task stops waiting on a call that is still running.
struct DetachNotice {
    armed: bool,
}

impl DetachNotice {
    fn armed() -> Self {
        Self { armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DetachNotice {
    fn drop(&mut self) {
        if self.armed {
            warn!("awaiting task dropped; offloaded call detached and will run to completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_value_from_worker_thread() {
        let loop_thread = thread::current().id();
        let (value, worker_thread) = run_blocking(|| (7, thread::current().id()))
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_ne!(worker_thread, loop_thread);
    }

    #[tokio::test]
    async fn test_run_passes_inner_error_through_unchanged() {
        #[derive(Debug, PartialEq)]
        struct Upstream(&'static str);

        let result: Result<Result<(), Upstream>, OffloadError> =
            run_blocking(|| Err(Upstream("conflict"))).await;

        assert_eq!(result, Ok(Err(Upstream("conflict"))));
    }

    #[tokio::test]
    async fn test_run_resumes_worker_panic_in_caller() {
        let outcome = AssertUnwindSafe(run_blocking(|| -> u32 { panic!("worker exploded") }))
            .catch_unwind()
            .await;

        let payload = outcome.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"worker exploded"));
    }

    #[tokio::test]
    async fn test_sequential_calls_preserve_issue_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let offloader = Offloader::new();

        for i in 0..20 {
            let log = Arc::clone(&log);
            let returned = offloader
                .run(move || {
                    log.lock().unwrap().push(i);
                    i
                })
                .await
                .unwrap();
            assert_eq!(returned, i);
        }

        assert_eq!(*log.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_limit_bounds_concurrent_calls() {
        let offloader = Offloader::with_limit(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let calls = (0..8).map(|_| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            offloader.run(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
            })
        });

        for result in futures::future::join_all(calls).await {
            result.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(offloader.available_permits(), Some(2));
    }

    #[tokio::test]
    async fn test_cancelled_wait_detaches_running_call() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let waited = tokio::time::timeout(
            Duration::from_millis(5),
            run_blocking(move || {
                thread::sleep(Duration::from_millis(50));
                flag.store(true, Ordering::SeqCst);
            }),
        )
        .await;
        assert!(waited.is_err());

        for _ in 0..50 {
            if finished.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_zero_limit_still_admits_calls() {
        let offloader = Offloader::with_limit(0);
        assert_eq!(offloader.available_permits(), Some(1));
        assert_eq!(offloader.run(|| 3).await, Ok(3));
    }

    #[test]
    fn test_run_outside_runtime_fails() {
        let result = futures::executor::block_on(run_blocking(|| 1));
        assert_eq!(result, Err(OffloadError::NoRuntime));
    }
}
