//! Integration tests for core-async.
//!
//! These exercise the bridge primitives together the way a façade would: work
//! offloaded to the blocking pool calls back into the loop through the portal.

use core_async::offload::Offloader;
use core_async::portal::Portal;
use core_async::scoped::{self, ScopeExit};
use core_async::{runtime, sync, task, time, OffloadError};
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[core_async::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    let result = handle.await.unwrap();
    assert_eq!(result, 42);
}

#[core_async::test]
async fn test_default_test_runtime_is_cooperative_loop() {
    assert!(runtime::is_cooperative_loop());
}

#[core_async::test(flavor = "multi_thread")]
async fn test_multi_thread_flavor_is_not_cooperative_loop() {
    assert!(!runtime::is_cooperative_loop());
}

#[core_async::test]
async fn test_offloaded_work_calls_back_into_loop() {
    let portal = Portal::new();
    portal.open().unwrap();
    let loop_thread = runtime::current_thread_id();

    let remote = portal.clone();
    let (worker, callback_thread) = Offloader::new()
        .run(move || {
            let callback_thread = remote.call(runtime::current_thread_id).unwrap();
            (runtime::current_thread_id(), callback_thread)
        })
        .await
        .unwrap();

    assert_ne!(worker, loop_thread);
    assert_eq!(callback_thread, loop_thread);
    portal.close().await.unwrap();
}

#[core_async::test]
async fn test_loop_keeps_running_other_tasks_during_offload() {
    let (tx, rx) = sync::oneshot::channel::<()>();

    let ticker = task::spawn(async move {
        time::sleep(time::Duration::from_millis(5)).await;
        tx.send(()).unwrap();
    });

    let waited = Offloader::new()
        .run(move || rx.blocking_recv().is_ok())
        .await
        .unwrap();

    assert!(waited);
    ticker.await.unwrap();
}

#[core_async::test]
async fn test_portal_relays_callbacks_from_many_threads() {
    const CALLBACKS: usize = 40;

    let portal = Portal::new();
    portal.open().unwrap();
    let loop_thread = runtime::current_thread_id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let off_loop = Arc::new(AtomicUsize::new(0));

    let offloader = Offloader::new();
    let calls = (0..CALLBACKS).map(|payload| {
        let portal = portal.clone();
        let seen = Arc::clone(&seen);
        let off_loop = Arc::clone(&off_loop);
        offloader.run(move || {
            portal
                .call(move || {
                    if thread::current().id() != loop_thread {
                        off_loop.fetch_add(1, Ordering::SeqCst);
                    }
                    seen.lock().unwrap().push(payload);
                })
                .unwrap()
        })
    });

    for result in futures::future::join_all(calls).await {
        result.unwrap();
    }

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, (0..CALLBACKS).collect::<Vec<_>>());
    assert_eq!(off_loop.load(Ordering::SeqCst), 0);
    portal.close().await.unwrap();
}

#[derive(Debug, thiserror::Error)]
enum ScopeError {
    #[error("scope body failed: {0}")]
    Body(String),
    #[error(transparent)]
    Offload(#[from] OffloadError),
    #[error("resource error: {0}")]
    Resource(String),
}

impl From<String> for ScopeError {
    fn from(msg: String) -> Self {
        ScopeError::Resource(msg)
    }
}

#[core_async::test]
async fn test_scoped_resource_runs_phases_off_loop() {
    let loop_thread = runtime::current_thread_id();
    let phases = Arc::new(Mutex::new(Vec::new()));

    let acquire_phases = Arc::clone(&phases);
    let release_phases = Arc::clone(&phases);
    let resource = scoped::from_fns(
        move || {
            acquire_phases
                .lock()
                .unwrap()
                .push(("acquire", runtime::current_thread_id()));
            Ok::<_, String>(0u32)
        },
        move |_count: u32, exit: ScopeExit<'_>| {
            release_phases
                .lock()
                .unwrap()
                .push(("release", runtime::current_thread_id()));
            Ok(exit.error().is_some())
        },
    );

    let result = scoped::with_resource(&Offloader::new(), resource, |count| {
        async move {
            *count += 1;
            Err::<(), _>(ScopeError::Body(format!("count={}", count)))
        }
        .boxed()
    })
    .await;

    assert!(matches!(result, Ok(None)));
    let phases = phases.lock().unwrap();
    assert_eq!(phases.len(), 2);
    assert!(phases.iter().all(|(_, thread)| *thread != loop_thread));
}
