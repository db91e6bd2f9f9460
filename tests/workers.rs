mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Journal, eventually, fast_config};
use modvisor::{
    Config, EventData, FailureStatus, Module, ModuleSpec, Runtime, TaskError, UnitKind,
};
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

async fn online(cfg: Config) -> (Arc<Runtime>, Arc<Module>) {
    let rt = Runtime::new(cfg);
    let m = rt.register("jobs", ModuleSpec::new());
    rt.start().await.unwrap();
    (rt, m)
}

async fn boom(msg: &'static str) -> Result<(), TaskError> {
    panic!("{msg}")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_service_worker_restarts_with_growing_delay() {
    let (rt, m) = online(fast_config()).await;
    let runs = Mutex::new(Vec::<Instant>::new());

    let res = m
        .run_worker("flaky", true, |_ctx| {
            let attempt = {
                let mut runs = runs.lock().unwrap();
                runs.push(Instant::now());
                runs.len()
            };
            async move {
                if attempt < 3 {
                    Err(TaskError::fail(format!("attempt {attempt}")))
                } else {
                    Ok(())
                }
            }
        })
        .await;
    assert!(res.is_ok());

    let runs = runs.into_inner().unwrap();
    assert_eq!(runs.len(), 3);
    let first_gap = runs[1] - runs[0];
    let second_gap = runs[2] - runs[1];
    assert!(first_gap >= Duration::from_millis(30), "{first_gap:?}");
    assert!(second_gap >= first_gap, "{first_gap:?} then {second_gap:?}");
    rt.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_plain_worker_error_is_returned_once() {
    let (rt, m) = online(fast_config()).await;
    let runs = AtomicUsize::new(0);
    let res = m
        .run_worker("once", false, |_ctx| {
            runs.fetch_add(1, Ordering::SeqCst);
            async { Err(TaskError::fail("nope")) }
        })
        .await;
    assert_eq!(res.unwrap_err().as_label(), "task_failed");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    rt.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_panic_is_recovered_and_reported() {
    let (rt, m) = online(fast_config()).await;
    let (tx, mut rx) = mpsc::channel(4);
    rt.set_error_reporting(tx);

    let handle = m.start_worker("crasher", false, |_ctx| boom("kaboom"));
    let err = handle.await.unwrap().unwrap_err();
    let fault = err.fault().unwrap();
    assert_eq!(fault.payload, "kaboom");

    let reported = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reported.module, "jobs");
    assert_eq!(reported.name, "crasher");
    assert_eq!(reported.kind, UnitKind::Worker);
    assert!(!reported.backtrace.is_empty());

    // The runtime keeps working after a recovered panic.
    let ok = m.run_worker("after", false, |_ctx| async { Ok(()) }).await;
    assert!(ok.is_ok());
    rt.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_workers_observe_module_stop() {
    let rt = Runtime::new(fast_config());
    let exits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&exits);
    let m = rt.register(
        "listener",
        ModuleSpec::new().start(move |m| {
            let counter = Arc::clone(&counter);
            async move {
                m.start_worker("accept", true, move |ctx| {
                    let counter = Arc::clone(&counter);
                    async move {
                        ctx.cancelled().await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(TaskError::Canceled)
                    }
                });
                Ok(())
            }
        }),
    );
    rt.start().await.unwrap();
    assert!(eventually(Duration::from_secs(1), || m.workers() == 1).await);

    rt.shutdown().await.unwrap();
    assert_eq!(exits.load(Ordering::SeqCst), 1);
    assert_eq!(m.workers(), 0);
}

fn hold(m: &Arc<Module>, release: &Arc<Notify>) -> tokio::task::JoinHandle<Result<(), TaskError>> {
    let m = Arc::clone(m);
    let release = Arc::clone(release);
    tokio::spawn(async move {
        m.start_microtask("hog", |_ctx| async move {
            release.notified().await;
            Ok(())
        })
        .await
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_medium_tier_is_served_before_low() {
    let cfg = Config {
        microtask_threshold: 1,
        medium_priority_max_wait: Duration::from_secs(5),
        low_priority_max_wait: Duration::from_secs(5),
        ..fast_config()
    };
    let (rt, m) = online(cfg).await;
    let release = Arc::new(Notify::new());
    let hog = hold(&m, &release);
    assert!(eventually(Duration::from_secs(1), || m.microtasks() == 1).await);

    let order = Arc::new(Mutex::new(Vec::new()));
    let spawn_tier = |medium: bool| {
        let (m, order) = (Arc::clone(&m), Arc::clone(&order));
        tokio::spawn(async move {
            let record = move |_ctx: CancellationToken| async move {
                order.lock().unwrap().push(if medium { "medium" } else { "low" });
                Ok::<_, TaskError>(())
            };
            if medium {
                m.start_medium_priority_microtask("medium", record).await
            } else {
                m.start_low_priority_microtask("low", record).await
            }
        })
    };
    let low = spawn_tier(false);
    tokio::time::sleep(Duration::from_millis(30)).await;
    let medium = spawn_tier(true);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(order.lock().unwrap().is_empty());

    release.notify_one();
    hog.await.unwrap().unwrap();
    low.await.unwrap().unwrap();
    medium.await.unwrap().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["medium", "low"]);
    rt.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_high_tier_and_max_wait_bypass_the_cap() {
    let cfg = Config {
        microtask_threshold: 1,
        low_priority_max_wait: Duration::from_millis(80),
        ..fast_config()
    };
    let (rt, m) = online(cfg).await;
    let release = Arc::new(Notify::new());
    let hog = hold(&m, &release);
    assert!(eventually(Duration::from_secs(1), || m.microtasks() == 1).await);

    m.start_microtask("urgent", |_ctx| async { Ok(()) })
        .await
        .unwrap();

    let started = Instant::now();
    m.start_low_priority_microtask("background", |_ctx| async { Ok(()) })
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert_eq!(m.microtasks(), 1);

    release.notify_one();
    hog.await.unwrap().unwrap();
    assert!(eventually(Duration::from_secs(1), || rt.status().total.in_flight == 0).await);
    rt.set_max_concurrent_microtasks(8);
    assert_eq!(rt.max_concurrent_microtasks(), 8);
    rt.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_event_hook_waits_for_owner_start() {
    let rt = Runtime::new(fast_config());
    let journal = Journal::default();

    rt.register(
        "source",
        ModuleSpec::new()
            .prep(|m| async move {
                m.register_event("ready");
                Ok(())
            })
            .start(|m| async move {
                m.trigger_event("ready", Arc::new(7u32) as EventData);
                Ok(())
            }),
    );
    let (on_prep, on_start) = (journal.clone(), journal.clone());
    rt.register(
        "sink",
        ModuleSpec::new()
            .depends_on(["source"])
            .prep(move |m| {
                let journal = on_prep.clone();
                async move {
                    m.register_event_hook("source", "ready", "sink listener", move |_ctx, data| {
                        let journal = journal.clone();
                        async move {
                            let value = data.downcast_ref::<u32>().copied().unwrap_or_default();
                            journal.push(format!("hook:{value}"));
                            Ok(())
                        }
                    })
                    .map_err(|e| TaskError::fail(e.to_string()))
                }
            })
            .start(move |_m| {
                let journal = on_start.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    journal.push("sink-started");
                    Ok(())
                }
            }),
    );

    rt.start().await.unwrap();
    assert!(eventually(Duration::from_secs(2), || journal.entries().len() == 2).await);
    assert_eq!(journal.entries(), vec!["sink-started", "hook:7"]);
    rt.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_event_hook_registration_errors() {
    let rt = Runtime::new(fast_config());
    let source = rt.register("source", ModuleSpec::new());
    let sink = rt.register("sink", ModuleSpec::new());
    source.register_event("ready");

    let err = sink
        .register_event_hook("nowhere", "ready", "x", |_ctx, _data| async { Ok(()) })
        .unwrap_err();
    assert_eq!(err.as_label(), "runtime_unknown_module");
    let err = sink
        .register_event_hook("source", "gone", "x", |_ctx, _data| async { Ok(()) })
        .unwrap_err();
    assert_eq!(err.as_label(), "runtime_unknown_event");
    assert!(
        sink.register_event_hook("source", "ready", "x", |_ctx, _data| async { Ok(()) })
            .is_ok()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failure_updates_are_idempotent() {
    let (rt, m) = online(fast_config()).await;
    let updates = Arc::new(Mutex::new(Vec::<(FailureStatus, String)>::new()));
    let sink = Arc::clone(&updates);
    rt.set_failure_update_fn(move |status, id, _title, _msg| {
        sink.lock().unwrap().push((status, id.to_string()));
    });
    let count = || updates.lock().unwrap().len();

    m.error("disk", "Disk", "disk is full");
    m.error("disk", "Disk", "disk is still full");
    assert!(eventually(Duration::from_secs(1), || count() == 1).await);
    assert_eq!(m.failure_status(), FailureStatus::Error);
    assert_eq!(m.failure().3, "disk is full");

    m.warning("net", "Network", "flapping");
    assert!(eventually(Duration::from_secs(1), || count() == 3).await);

    m.resolve("disk");
    m.resolve("");
    assert!(eventually(Duration::from_secs(1), || count() == 4).await);
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(
        *updates.lock().unwrap(),
        vec![
            (FailureStatus::Error, "disk".to_string()),
            (FailureStatus::None, "disk".to_string()),
            (FailureStatus::Warning, "net".to_string()),
            (FailureStatus::None, "net".to_string()),
        ]
    );
    assert_eq!(m.failure_status(), FailureStatus::None);
    assert_eq!(rt.status().modules[0].failure_status, FailureStatus::None);
    rt.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_failure_updates_are_delivered_in_order() {
    let (rt, m) = online(fast_config()).await;
    let raised = Arc::new(Mutex::new(HashSet::<String>::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let (sink, counter) = (Arc::clone(&raised), Arc::clone(&calls));
    rt.set_failure_update_fn(move |status, id, _title, _msg| {
        let mut raised = sink.lock().unwrap();
        if status == FailureStatus::None {
            raised.remove(id);
        } else {
            raised.insert(id.to_string());
        }
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for i in 0..2000 {
        m.error(&format!("e{i}"), "Error", "failing");
    }
    // One update for the first error, then a clear plus a raise for each of the rest.
    assert!(eventually(Duration::from_secs(5), || calls.load(Ordering::SeqCst) == 3999).await);
    assert_eq!(*raised.lock().unwrap(), HashSet::from(["e1999".to_string()]));
    assert_eq!(m.failure().1, "e1999");
    rt.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_event_hook_panic_is_reported_as_event_hook() {
    let rt = Runtime::new(fast_config());
    let source = rt.register("source", ModuleSpec::new());
    let sink = rt.register("sink", ModuleSpec::new());
    source.register_event("tick");
    sink.register_event_hook("source", "tick", "sink ticker", |_ctx, _data| boom("hook blew up"))
        .unwrap();
    let (tx, mut rx) = mpsc::channel(4);
    rt.set_error_reporting(tx);
    rt.start().await.unwrap();

    source.trigger_event("tick", Arc::new(()) as EventData);
    let reported = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reported.module, "sink");
    assert_eq!(reported.name, "sink ticker");
    assert_eq!(reported.kind, UnitKind::EventHook);
    assert_eq!(reported.payload, "hook blew up");
    rt.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_medium_tier_is_admitted_while_stopping() {
    let cfg = Config {
        microtask_threshold: 1,
        medium_priority_max_wait: Duration::from_secs(5),
        ..fast_config()
    };
    let rt = Runtime::new(cfg);
    let waited = Arc::new(Mutex::new(None::<Duration>));
    let record = Arc::clone(&waited);
    rt.register(
        "flusher",
        ModuleSpec::new().stop(move |m| {
            let record = Arc::clone(&record);
            async move {
                let release = Arc::new(Notify::new());
                let hog = hold(&m, &release);
                if !eventually(Duration::from_secs(1), || m.microtasks() == 1).await {
                    return Err(TaskError::fail("hog never started"));
                }
                let releaser = Arc::clone(&release);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    releaser.notify_one();
                });

                let begin = Instant::now();
                let res = m
                    .start_medium_priority_microtask("flush", |_ctx| async { Ok(()) })
                    .await;
                *record.lock().unwrap() = Some(begin.elapsed());
                let _ = hog.await;
                res
            }
        }),
    );
    rt.start().await.unwrap();
    rt.shutdown().await.unwrap();

    let waited = *waited.lock().unwrap();
    let waited = waited.expect("stop hook finished");
    assert!(waited < Duration::from_secs(1), "{waited:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_event_hooks_are_skipped_during_shutdown() {
    let rt = Runtime::new(fast_config());
    let sink = rt.register("sink", ModuleSpec::new());
    let source = rt.register(
        "source",
        ModuleSpec::new().depends_on(["sink"]).stop(|m| async move {
            m.trigger_event("closing", Arc::new(()) as EventData);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }),
    );
    source.register_event("closing");
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    sink.register_event_hook("source", "closing", "sink closer", move |_ctx, _data| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .unwrap();

    rt.start().await.unwrap();
    rt.shutdown().await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
