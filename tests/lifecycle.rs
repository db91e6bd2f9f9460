mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Journal, fast_config, journaled};
use modvisor::{ModuleSpec, ModuleStatus, Runtime, RuntimeError, Startup, TaskError};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_and_stop_follow_dependency_order() {
    let rt = Runtime::new(fast_config());
    let journal = Journal::default();
    rt.register("db", journaled(&journal, "db", &[]));
    rt.register("cache", journaled(&journal, "cache", &["db"]));
    rt.register("api", journaled(&journal, "api", &["db", "cache"]));
    rt.register("metrics", journaled(&journal, "metrics", &[]));

    assert_eq!(rt.start().await.unwrap(), Startup::Online);
    for m in rt.modules() {
        assert_eq!(m.status(), ModuleStatus::Online, "{}", m.name());
    }
    assert!(journal.position("start:db") < journal.position("start:cache"));
    assert!(journal.position("start:cache") < journal.position("start:api"));

    rt.shutdown().await.unwrap();
    assert!(journal.position("stop:api") < journal.position("stop:cache"));
    assert!(journal.position("stop:cache") < journal.position("stop:db"));
    assert_eq!(journal.with_prefix("stop:").len(), 4);
    assert_eq!(rt.exit_status_code().await, 0);
    for m in rt.modules() {
        assert_eq!(m.status(), ModuleStatus::Offline);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dependency_cycle_fails_startup() {
    let rt = Runtime::new(fast_config());
    let journal = Journal::default();
    rt.register("a", journaled(&journal, "a", &["c"]));
    rt.register("b", journaled(&journal, "b", &["a"]));
    rt.register("c", journaled(&journal, "c", &["b"]));
    rt.register("free", journaled(&journal, "free", &[]));

    let err = rt.start().await.unwrap_err();
    match err {
        RuntimeError::DependencyCycle { modules } => {
            assert_eq!(modules, vec!["a", "b", "c"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(rt.modules().iter().all(|m| m.status() != ModuleStatus::Online));
    assert_eq!(rt.exit_status_code().await, 1);
}

#[tokio::test]
async fn test_unknown_dependency_is_configuration_error() {
    let rt = Runtime::new(fast_config());
    rt.register("api", ModuleSpec::new().depends_on(["missing"]));
    let err = rt.start().await.unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(err.as_label(), "runtime_unknown_dependency");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_failure_shuts_down_started_modules() {
    let rt = Runtime::new(fast_config());
    let journal = Journal::default();
    rt.register("db", journaled(&journal, "db", &[]));
    rt.register(
        "api",
        ModuleSpec::new()
            .depends_on(["db"])
            .start(|_m| async { Err(TaskError::fail("port in use")) }),
    );

    let err = rt.start().await.unwrap_err();
    assert_eq!(err.as_label(), "runtime_start_failed");
    assert!(err.to_string().contains("port in use"));
    assert!(rt.is_shutting_down());
    assert_eq!(journal.entries(), vec!["start:db", "stop:db"]);
    assert_eq!(rt.exit_status_code().await, 1);
}

#[tokio::test]
async fn test_prep_error_aborts_before_any_start() {
    let rt = Runtime::new(fast_config());
    let journal = Journal::default();
    rt.register("db", journaled(&journal, "db", &[]));
    rt.register(
        "config",
        ModuleSpec::new().prep(|_m| async { Err(TaskError::fail("bad flag")) }),
    );

    let err = rt.start().await.unwrap_err();
    assert_eq!(err.as_label(), "runtime_prep_failed");
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn test_clean_exit_from_prep() {
    let rt = Runtime::new(fast_config());
    let journal = Journal::default();
    rt.register("db", journaled(&journal, "db", &[]));
    rt.register(
        "cli",
        ModuleSpec::new().prep(|_m| async { Err(TaskError::CleanExit) }),
    );

    assert_eq!(rt.start().await.unwrap(), Startup::CleanExit);
    assert!(journal.entries().is_empty());
    assert_eq!(rt.exit_status_code().await, 0);
}

#[tokio::test]
async fn test_global_prep_runs_first() {
    let rt = Runtime::new(fast_config());
    let order = Arc::new(AtomicUsize::new(0));
    let seen_by_prep = Arc::new(AtomicUsize::new(usize::MAX));

    let o = Arc::clone(&order);
    rt.set_global_prep_fn(move || async move {
        o.store(1, Ordering::SeqCst);
        Ok(())
    });
    let (o, s) = (Arc::clone(&order), Arc::clone(&seen_by_prep));
    rt.register(
        "m",
        ModuleSpec::new().prep(move |_m| {
            let (o, s) = (Arc::clone(&o), Arc::clone(&s));
            async move {
                s.store(o.load(Ordering::SeqCst), Ordering::SeqCst);
                Ok(())
            }
        }),
    );

    rt.start().await.unwrap();
    assert_eq!(seen_by_prep.load(Ordering::SeqCst), 1);
    rt.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_error_is_reported_and_others_still_stop() {
    let rt = Runtime::new(fast_config());
    let journal = Journal::default();
    rt.register("db", journaled(&journal, "db", &[]));
    rt.register(
        "broken",
        ModuleSpec::new()
            .depends_on(["db"])
            .stop(|_m| async { Err(TaskError::fail("flush failed")) }),
    );

    rt.start().await.unwrap();
    let err = rt.shutdown().await.unwrap_err();
    assert_eq!(err.as_label(), "runtime_stop_failed");
    assert!(journal.entries().contains(&"stop:db".to_string()));
    assert_eq!(rt.exit_status_code().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_shutdown_waits_and_succeeds() {
    let rt = Runtime::new(fast_config());
    let journal = Journal::default();
    rt.register("db", journaled(&journal, "db", &[]));
    rt.start().await.unwrap();

    let (a, b) = tokio::join!(rt.shutdown(), rt.shutdown());
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(journal.with_prefix("stop:").len(), 1);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let rt = Runtime::new(fast_config());
    rt.start().await.unwrap();
    let err = rt.start().await.unwrap_err();
    assert_eq!(err.as_label(), "runtime_already_started");
    rt.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_registration_replaces_module() {
    let rt = Runtime::new(fast_config());
    let journal = Journal::default();
    rt.register("db", journaled(&journal, "first", &[]));
    rt.register("db", journaled(&journal, "second", &[]));
    assert_eq!(rt.modules().len(), 1);

    rt.start().await.unwrap();
    assert_eq!(journal.with_prefix("start:"), vec!["start:second"]);
    rt.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exit_code_set_explicitly() {
    let rt = Runtime::new(fast_config());
    rt.start().await.unwrap();
    rt.set_exit_status_code(3);
    rt.shutdown().await.unwrap();
    assert_eq!(rt.exit_status_code().await, 3);
}

#[tokio::test]
async fn test_status_snapshot_and_graph() {
    let rt = Runtime::new(fast_config());
    let journal = Journal::default();
    rt.register("db", journaled(&journal, "db", &[]));
    rt.register("api", journaled(&journal, "api", &["db"]));
    rt.start().await.unwrap();

    let status = rt.status();
    assert_eq!(status.modules.len(), 2);
    assert_eq!(status.config.microtask_threshold, 4);
    let json = status.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["modules"][0]["name"], "db");
    assert_eq!(value["modules"][0]["status"], "online");
    assert_eq!(value["modules"][1]["failure_status"], "none");

    let graph = rt.dependency_graph();
    assert_eq!(graph, "api [online]\n  db [online]\n");
    rt.shutdown().await.unwrap();
}
