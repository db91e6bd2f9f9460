//! # State shared by the runtime, its modules and the schedulers.
//!
//! [`Shared`] is created once by the builder and handed to every module as an `Arc`.
//! It owns everything a unit of work needs without going back to the [`Runtime`](crate::Runtime):
//! configuration, the event bus, cancellation tokens, the admission gate and the task lists.
//!
//! ## Rules
//! - `Shared` never holds modules; modules hold `Shared`.
//! - Callbacks are read under a short `RwLock` and invoked outside of it.
//! - The spawn handle is captured at build time so work can be spawned from any thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::module::{FailureStatus, Module};
use crate::events::Bus;
use crate::fault::Fault;
use crate::microtasks::Gate;
use crate::tasks::TaskQueues;

/// Callback invoked whenever a module changes (status, failure, enabled flag).
pub(crate) type ChangeNotifyFn = Arc<dyn Fn(&Module) + Send + Sync>;

/// Callback receiving failure status updates: `(status, id, title, msg)`.
///
/// Clearing a previous failure is reported as `FailureStatus::None` with the old id.
pub(crate) type FailureUpdateFn = Arc<dyn Fn(FailureStatus, &str, &str, &str) + Send + Sync>;

pub(crate) struct Shared {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) handle: Handle,

    /// Cancelled exactly once, when shutdown begins.
    pub(crate) shutdown: CancellationToken,
    /// Cancelled when every module has stopped.
    pub(crate) shutdown_done: CancellationToken,
    pub(crate) exit_code: Mutex<Option<i32>>,

    pub(crate) gate: Arc<Gate>,
    pub(crate) tasks: Arc<TaskQueues>,

    reporter: RwLock<Option<mpsc::Sender<Fault>>>,
    change_notify: RwLock<Option<ChangeNotifyFn>>,
    failure_update: RwLock<Option<FailureUpdateFn>>,

    pub(crate) management: AtomicBool,
    pub(crate) management_requested: Notify,
    /// Woken on every module status transition.
    pub(crate) status_changed: Notify,
}

impl Shared {
    pub(crate) fn new(cfg: Config, bus: Bus, handle: Handle) -> Self {
        let gate = Arc::new(Gate::new(cfg.threshold_clamped(), cfg.microtask_floor));
        let management = AtomicBool::new(cfg.module_management);
        Self {
            cfg,
            bus,
            handle,
            shutdown: CancellationToken::new(),
            shutdown_done: CancellationToken::new(),
            exit_code: Mutex::new(None),
            gate,
            tasks: Arc::new(TaskQueues::new()),
            reporter: RwLock::new(None),
            change_notify: RwLock::new(None),
            failure_update: RwLock::new(None),
            management,
            management_requested: Notify::new(),
            status_changed: Notify::new(),
        }
    }

    #[inline]
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    #[inline]
    pub(crate) fn management_enabled(&self) -> bool {
        self.management.load(Ordering::Acquire)
    }

    /// Sets the exit code unless one was already set.
    pub(crate) fn set_exit_code_if_unset(&self, code: i32) {
        let mut slot = self.exit_code.lock().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert(code);
    }

    pub(crate) fn set_exit_code(&self, code: i32) {
        *self.exit_code.lock().unwrap_or_else(|e| e.into_inner()) = Some(code);
    }

    pub(crate) fn exit_code(&self) -> i32 {
        self.exit_code
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or(0)
    }

    pub(crate) fn set_reporter(&self, tx: Option<mpsc::Sender<Fault>>) {
        *self.reporter.write().unwrap_or_else(|e| e.into_inner()) = tx;
    }

    /// Hands a fault to the reporting channel; dropped if the channel is not ready.
    pub(crate) fn report_fault(&self, fault: &Fault) {
        let guard = self.reporter.read().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            let _ = tx.try_send(fault.clone());
        }
    }

    pub(crate) fn set_change_notify(&self, f: Option<ChangeNotifyFn>) {
        *self.change_notify.write().unwrap_or_else(|e| e.into_inner()) = f;
    }

    pub(crate) fn change_notify(&self) -> Option<ChangeNotifyFn> {
        self.change_notify
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_failure_update(&self, f: Option<FailureUpdateFn>) {
        *self.failure_update.write().unwrap_or_else(|e| e.into_inner()) = f;
    }

    pub(crate) fn failure_update(&self) -> Option<FailureUpdateFn> {
        self.failure_update
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Asks the management loop for a pass (no-op when management is off).
    pub(crate) fn request_management(&self) {
        if self.management_enabled() {
            self.management_requested.notify_one();
        }
    }
}
