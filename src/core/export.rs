//! # Status export.
//!
//! [`Runtime::status`] takes a JSON-serializable snapshot of every module (flags, lifecycle
//! status, failure state, live counters), process-wide totals and the scheduler settings.
//! Taking a snapshot never blocks on running work.

use serde::Serialize;

use crate::core::module::{FailureStatus, ModuleStatus};
use crate::core::runtime::Runtime;

/// Snapshot of one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    /// Module name.
    pub name: String,
    /// Explicitly enabled.
    pub enabled: bool,
    /// Pulled in as a dependency of an enabled module.
    pub enabled_as_dependency: bool,
    /// Lifecycle status.
    pub status: ModuleStatus,
    /// Failure status.
    pub failure_status: FailureStatus,
    /// Failure id (empty if none).
    pub failure_id: String,
    /// Failure title.
    pub failure_title: String,
    /// Failure message.
    pub failure_msg: String,
    /// Live workers.
    pub workers: usize,
    /// Live task executions.
    pub tasks: usize,
    /// Live microtasks.
    pub microtasks: usize,
}

/// Process-wide live counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Totals {
    /// Live workers across modules.
    pub workers: usize,
    /// Live task executions across modules.
    pub tasks: usize,
    /// Live microtasks across modules.
    pub microtasks: usize,
    /// Admission slots currently held (microtasks and task executions).
    pub in_flight: usize,
    /// Tasks waiting in the plain queue.
    pub queued_tasks: usize,
    /// Tasks waiting in the prioritized queue.
    pub prioritized_tasks: usize,
    /// Entries in the schedule list.
    pub scheduled_tasks: usize,
}

/// Current scheduler settings.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSettings {
    /// Effective microtask concurrency threshold.
    pub microtask_threshold: usize,
    /// Medium priority max wait in milliseconds.
    pub medium_priority_max_wait_ms: u64,
    /// Low priority max wait in milliseconds.
    pub low_priority_max_wait_ms: u64,
    /// Task slot watchdog ceiling in milliseconds.
    pub max_execution_wait_ms: u64,
}

/// Snapshot returned by [`Runtime::status`].
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    /// Modules in registration order.
    pub modules: Vec<ModuleReport>,
    /// Totals.
    pub total: Totals,
    /// Scheduler settings.
    pub config: SchedulerSettings,
}

impl Status {
    /// Renders the snapshot as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Runtime {
    /// Takes a status snapshot.
    pub fn status(&self) -> Status {
        let mut total = Totals::default();
        let modules = self
            .registry
            .snapshot()
            .iter()
            .map(|m| {
                let (failure_status, failure_id, failure_title, failure_msg) = m.failure();
                let report = ModuleReport {
                    name: m.name().to_string(),
                    enabled: m.enabled(),
                    enabled_as_dependency: m.enabled_as_dependency(),
                    status: m.status(),
                    failure_status,
                    failure_id,
                    failure_title,
                    failure_msg,
                    workers: m.workers(),
                    tasks: m.tasks(),
                    microtasks: m.microtasks(),
                };
                total.workers += report.workers;
                total.tasks += report.tasks;
                total.microtasks += report.microtasks;
                report
            })
            .collect();
        total.in_flight = self.shared.gate.in_flight();
        (total.queued_tasks, total.prioritized_tasks, total.scheduled_tasks) =
            self.shared.tasks.len();

        let cfg = &self.shared.cfg;
        Status {
            modules,
            total,
            config: SchedulerSettings {
                microtask_threshold: self.shared.gate.threshold(),
                medium_priority_max_wait_ms: millis(cfg.medium_priority_max_wait),
                low_priority_max_wait_ms: millis(cfg.low_priority_max_wait),
                max_execution_wait_ms: millis(cfg.max_execution_wait),
            },
        }
    }

    /// Renders the module dependency graph as an indented tree with statuses.
    ///
    /// ```text
    /// api [online]
    ///   database [online]
    /// ```
    pub fn dependency_graph(&self) -> String {
        self.registry.render_graph()
    }
}
