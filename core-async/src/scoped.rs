//! # Scoped Two-Phase Resources
//!
//! Lets an async scope borrow a resource whose acquire and release steps are
//! blocking. Both steps run on worker threads through an [`Offloader`]; the
//! scope body runs on the awaiting task.
//!
//! ## Protocol
//!
//! 1. `acquire` is offloaded. If it fails, the error is returned and `release`
//!    never runs for that attempt.
//! 2. The body receives `&mut Handle`.
//! 3. `release` is offloaded exactly once with the handle and a [`ScopeExit`]:
//!    - body returned `Ok(v)` → `ScopeExit::Completed`; the scope yields `Some(v)`
//!    - body returned `Err(e)` → `ScopeExit::Failed(&e)`; if release returns
//!      `true` the error is suppressed and the scope yields `None`, otherwise
//!      `e` itself is returned
//!    - body panicked → `ScopeExit::Failed` with a [`BodyPanicked`] context,
//!      after which the panic is resumed
//!    - the scope future was dropped mid-body → `ScopeExit::Cancelled`, released
//!      in the background
//!
//! A scope dropped while `acquire` is still running on its worker releases the
//! handle as `ScopeExit::Cancelled` on that worker once `acquire` returns.
//!
//! An error from `release` itself replaces whatever the body produced.
//!
//! ## Usage
//!
//! ```rust
//! use core_async::offload::Offloader;
//! use core_async::scoped::{self, ScopeExit};
//! use futures::FutureExt;
//!
//! #[derive(Debug, thiserror::Error)]
//! enum Error {
//!     #[error(transparent)]
//!     Offload(#[from] core_async::OffloadError),
//!     #[error("release failed")]
//!     Release,
//! }
//!
//! impl From<()> for Error {
//!     fn from(_: ()) -> Self {
//!         Error::Release
//!     }
//! }
//!
//! # core_async::runtime::block_on(async {
//! let resource = scoped::from_fns(
//!     || Ok::<_, ()>(vec![1, 2, 3]),
//!     |items: Vec<i32>, exit: ScopeExit<'_>| {
//!         assert!(exit.is_completed());
//!         assert_eq!(items.len(), 4);
//!         Ok(false)
//!     },
//! );
//!
//! let total = scoped::with_resource(&Offloader::new(), resource, |items| {
//!     async move {
//!         items.push(4);
//!         Ok::<_, Error>(items.iter().sum::<i32>())
//!     }
//!     .boxed()
//! })
//! .await
//! .unwrap();
//!
//! assert_eq!(total, Some(10));
//! # });
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::{BodyPanicked, OffloadError};
use crate::offload::Offloader;
use crate::sync::oneshot;

/// How a scope ended, handed to the release step.
#[derive(Debug, Clone, Copy)]
pub enum ScopeExit<'a> {
    /// The body finished without error.
    Completed,
    /// The body returned this error. Use `downcast_ref` to inspect its type
    /// and `source()` to walk its cause chain.
    Failed(&'a (dyn StdError + Send + Sync + 'static)),
    /// The scope was abandoned before the body finished.
    Cancelled,
}

impl<'a> ScopeExit<'a> {
    pub fn is_completed(&self) -> bool {
        matches!(self, ScopeExit::Completed)
    }

    /// The body's error, if it failed.
    pub fn error(&self) -> Option<&'a (dyn StdError + Send + Sync + 'static)> {
        match self {
            ScopeExit::Failed(err) => Some(*err),
            _ => None,
        }
    }
}

impl fmt::Display for ScopeExit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeExit::Completed => write!(f, "completed"),
            ScopeExit::Failed(err) => write!(f, "failed: {}", err),
            ScopeExit::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A resource with a blocking acquire step and a blocking release step.
pub trait ScopedResource: Send + 'static {
    /// Value yielded to the scope body.
    type Handle: Send + 'static;
    type Error: fmt::Debug + Send + 'static;

    fn acquire(&mut self) -> Result<Self::Handle, Self::Error>;

    /// Returns `true` to suppress a body error reported via
    /// [`ScopeExit::Failed`]. Ignored for other exits.
    fn release(&mut self, handle: Self::Handle, exit: ScopeExit<'_>)
        -> Result<bool, Self::Error>;
}

impl<R> ScopedResource for Box<R>
where
    R: ScopedResource + ?Sized,
{
    type Handle = R::Handle;
    type Error = R::Error;

    fn acquire(&mut self) -> Result<Self::Handle, Self::Error> {
        (**self).acquire()
    }

    fn release(
        &mut self,
        handle: Self::Handle,
        exit: ScopeExit<'_>,
    ) -> Result<bool, Self::Error> {
        (**self).release(handle, exit)
    }
}

/// [`ScopedResource`] assembled from an acquire closure and a release closure.
pub struct FnResource<A, R, H, E> {
    acquire: A,
    release: R,
    _marker: PhantomData<fn() -> (H, E)>,
}

/// Builds a scoped resource from two blocking closures.
pub fn from_fns<A, R, H, E>(acquire: A, release: R) -> FnResource<A, R, H, E>
where
    A: FnMut() -> Result<H, E> + Send + 'static,
    R: FnMut(H, ScopeExit<'_>) -> Result<bool, E> + Send + 'static,
{
    FnResource {
        acquire,
        release,
        _marker: PhantomData,
    }
}

impl<A, R, H, E> ScopedResource for FnResource<A, R, H, E>
where
    A: FnMut() -> Result<H, E> + Send + 'static,
    R: FnMut(H, ScopeExit<'_>) -> Result<bool, E> + Send + 'static,
    H: Send + 'static,
    E: fmt::Debug + Send + 'static,
{
    type Handle = H;
    type Error = E;

    fn acquire(&mut self) -> Result<H, E> {
        (self.acquire)()
    }

    fn release(&mut self, handle: H, exit: ScopeExit<'_>) -> Result<bool, E> {
        (self.release)(handle, exit)
    }
}

/// Acquires `resource`, runs `body` with its handle and releases it.
///
/// Returns `Ok(Some(value))` when the body succeeds, `Ok(None)` when the body
/// failed and release suppressed the error, and `Err` otherwise.
pub async fn with_resource<R, F, T, E>(
    offloader: &Offloader,
    resource: R,
    body: F,
) -> Result<Option<T>, E>
where
    R: ScopedResource,
    F: for<'a> FnOnce(&'a mut R::Handle) -> BoxFuture<'a, Result<T, E>>,
    E: StdError + From<R::Error> + From<OffloadError> + Send + Sync + 'static,
{
    let (acquired_tx, acquired_rx) = oneshot::channel();
    let mut guard = ReleaseGuard {
        pending: Some(acquired_rx),
        held: None,
    };

    offloader
        .run(move || {
            let mut resource = resource;
            let acquired = resource.acquire();
            if let Err((resource, acquired)) = acquired_tx.send((resource, acquired)) {
                release_unclaimed(resource, acquired);
            }
        })
        .await?;

    let (resource, acquired) = guard.take_acquired().ok_or_else(|| {
        OffloadError::Cancelled("acquire finished without handing back its result".to_string())
    })?;
    let handle = acquired.map_err(E::from)?;
    debug!("scoped resource acquired");

    let (_, handle) = guard.held.insert((resource, handle));
    let outcome = AssertUnwindSafe(body(handle)).catch_unwind().await;

    let Some((mut resource, handle)) = guard.held.take() else {
        unreachable!("scoped resource state is only taken once");
    };

    match outcome {
        Ok(Ok(value)) => {
            offloader
                .run(move || resource.release(handle, ScopeExit::Completed))
                .await?
                .map_err(E::from)?;
            debug!("scoped resource released");
            Ok(Some(value))
        }
        Ok(Err(error)) => {
            let (suppressed, error) = offloader
                .run(move || {
                    let suppressed = resource.release(handle, ScopeExit::Failed(&error));
                    (suppressed, error)
                })
                .await?;

            if suppressed.map_err(E::from)? {
                debug!(error = %error, "scope error suppressed by release");
                Ok(None)
            } else {
                Err(error)
            }
        }
        Err(payload) => {
            let panicked = BodyPanicked::from_payload(payload.as_ref());
            warn!(error = %panicked, "releasing scoped resource after body panic");
            match offloader
                .run(move || resource.release(handle, ScopeExit::Failed(&panicked)))
                .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = ?err, "release after panic failed"),
                Err(err) => warn!(error = %err, "release after panic was not run"),
            }
            panic::resume_unwind(payload)
        }
    }
}

type Acquired<R> = (
    R,
    Result<<R as ScopedResource>::Handle, <R as ScopedResource>::Error>,
);

/// Runs on the acquiring worker when nobody is left to receive the handle.
fn release_unclaimed<R: ScopedResource>(mut resource: R, acquired: Result<R::Handle, R::Error>) {
    let Ok(handle) = acquired else {
        return;
    };
    warn!("scope abandoned during acquire; releasing resource as cancelled");
    if let Err(err) = resource.release(handle, ScopeExit::Cancelled) {
        warn!(error = ?err, "release after cancellation failed");
    }
}

/// Releases the resource as cancelled if the scope is abandoned before the
/// body finishes, including while `acquire` is still in flight.
struct ReleaseGuard<R: ScopedResource> {
    pending: Option<oneshot::Receiver<Acquired<R>>>,
    held: Option<(R, R::Handle)>,
}

impl<R: ScopedResource> ReleaseGuard<R> {
    fn take_acquired(&mut self) -> Option<Acquired<R>> {
        self.pending.take()?.try_recv().ok()
    }
}

impl<R: ScopedResource> Drop for ReleaseGuard<R> {
    fn drop(&mut self) {
        let abandoned = match (self.held.take(), self.pending.take()) {
            (Some(held), _) => Some(held),
            // Closing first means a worker still inside `acquire` sees the
            // failed send and releases on its own.
            (None, Some(mut pending)) => {
                pending.close();
                match pending.try_recv() {
                    Ok((resource, Ok(handle))) => Some((resource, handle)),
                    _ => None,
                }
            }
            (None, None) => None,
        };
        let Some((mut resource, handle)) = abandoned else {
            return;
        };

        warn!("scope abandoned before completion; releasing resource as cancelled");
        let release = move || {
            if let Err(err) = resource.release(handle, ScopeExit::Cancelled) {
                warn!(error = ?err, "release after cancellation failed");
            }
        };

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(release);
            }
            Err(_) => release(),
        }
    }
}
