#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use modvisor::{BackoffPolicy, Config, JitterPolicy, ModuleSpec, TaskError};

/// Configuration with short timings and no floors.
pub fn fast_config() -> Config {
    Config {
        microtask_threshold: 4,
        microtask_floor: 1,
        min_repeat: Duration::from_millis(10),
        service_backoff: BackoffPolicy {
            step: Duration::from_millis(30),
            max: Duration::from_secs(1),
            jitter: JitterPolicy::None,
        },
        module_stop_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

/// Shared journal of lifecycle calls, e.g. `"start:a"`.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("missing journal entry {entry}"))
    }
}

/// Module spec that journals its start and stop hooks.
pub fn journaled(journal: &Journal, name: &str, deps: &[&str]) -> ModuleSpec {
    let on_start = journal.clone();
    let on_stop = journal.clone();
    let start_name = name.to_string();
    let stop_name = name.to_string();
    ModuleSpec::new()
        .depends_on(deps.iter().copied())
        .start(move |_m| {
            let j = on_start.clone();
            let n = start_name.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                j.push(format!("start:{n}"));
                Ok::<_, TaskError>(())
            }
        })
        .stop(move |_m| {
            let j = on_stop.clone();
            let n = stop_name.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                j.push(format!("stop:{n}"));
                Ok::<_, TaskError>(())
            }
        })
}

/// Polls `cond` every few milliseconds until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Waits for a module to reach `status`.
pub async fn wait_status(module: &modvisor::Module, status: modvisor::ModuleStatus) {
    let mut rx = module.watch_status();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == status))
        .await
        .unwrap_or_else(|_| panic!("{} never became {status}", module.name()))
        .unwrap();
}
