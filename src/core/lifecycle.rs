//! # Lifecycle orchestration: prep, start and stop passes.
//!
//! ## Prep (sequential)
//! ```text
//! global prep fn ─► loop { first Dead module whose deps are prepped ─► prep().await }
//!   CleanExit → Startup::CleanExit     error → RuntimeError::Prep     none ready → cycle
//! ```
//!
//! ## Start / stop (concurrent fixed point)
//! ```text
//! loop {
//!   ├─► scan modules, launch every ready one (spawn_start / spawn_stop)
//!   ├─► nothing launched and nothing in flight → done, or stuck
//!   └─► wait for a report (or a status change)
//! }
//! ```
//!
//! ## Rules
//! - A start error aborts the pass immediately; modules already starting finish on their own.
//! - A stop error is recorded and the pass continues; the first error is returned.
//! - Only modules that are needed under management take part in a start pass; the
//!   enabled-as-dependency closure is computed before the first one.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::core::module::{Module, ModuleStatus};
use crate::core::runtime::Runtime;
use crate::error::{RuntimeError, TaskError};
use crate::events::{Event, EventKind};
use crate::fault::{UnitKind, install_panic_hook};
use crate::workers::recover;

/// Outcome of a successful [`Runtime::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    /// Every needed module is online.
    Online,
    /// A prep function requested a clean exit; the runtime has already shut down.
    CleanExit,
}

/// Which modules a stop pass targets.
#[derive(Debug, Clone, Copy)]
pub(super) enum StopScope {
    All,
    /// Modules no longer needed under module management.
    Unneeded,
}

impl StopScope {
    fn includes(&self, m: &Module) -> bool {
        match self {
            StopScope::All => true,
            StopScope::Unneeded => !m.needed(),
        }
    }
}

fn names(modules: &[Arc<Module>]) -> Vec<String> {
    modules.iter().map(|m| m.name().to_string()).collect()
}

impl Runtime {
    /// Resolves the dependency graph, preps and starts all modules.
    ///
    /// On a prep or start failure the runtime shuts down whatever already started, sets the
    /// exit code to `1` (unless one was set) and returns the error.
    pub async fn start(self: &Arc<Self>) -> Result<Startup, RuntimeError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyStarted);
        }
        install_panic_hook();
        info!(modules = self.registry.len(), "starting runtime");

        match self.bring_up().await {
            Ok(Startup::Online) => {
                self.spawn_management_loop();
                info!("all modules online");
                Ok(Startup::Online)
            }
            Ok(Startup::CleanExit) => {
                info!("clean exit requested during prep");
                self.shared.set_exit_code_if_unset(0);
                self.shutdown().await?;
                Ok(Startup::CleanExit)
            }
            Err(e) => {
                error!(error = %e, label = e.as_label(), "startup failed");
                self.shared.set_exit_code_if_unset(1);
                if let Err(stop_err) = self.shutdown().await {
                    warn!(error = %stop_err, "shutdown after failed startup reported errors");
                }
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> Result<Startup, RuntimeError> {
        self.registry.resolve()?;
        if self.prep_modules().await? == Startup::CleanExit {
            return Ok(Startup::CleanExit);
        }
        let _guard = self.mgmt_lock.lock().await;
        if self.shared.management_enabled() {
            self.recompute_dependency_closure();
        }
        self.start_modules().await?;
        Ok(Startup::Online)
    }

    async fn prep_modules(&self) -> Result<Startup, RuntimeError> {
        let global = self
            .global_prep
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(f) = global {
            let res = recover(&self.shared, "", UnitKind::Prep, "global-prep", async move {
                f().await
            })
            .await;
            match res {
                Ok(()) => {}
                Err(TaskError::CleanExit) => return Ok(Startup::CleanExit),
                Err(source) => return Err(RuntimeError::GlobalPrep { source }),
            }
        }

        loop {
            if self.shared.is_shutting_down() {
                return Err(RuntimeError::ShuttingDown);
            }
            let pending: Vec<Arc<Module>> = self
                .registry
                .snapshot()
                .into_iter()
                .filter(|m| m.status() == ModuleStatus::Dead)
                .collect();
            if pending.is_empty() {
                return Ok(Startup::Online);
            }
            let Some(next) = pending.iter().find(|m| m.ready_to_prep()) else {
                return Err(RuntimeError::DependencyCycle {
                    modules: names(&pending),
                });
            };
            match next.prep().await {
                Ok(()) => {}
                Err(TaskError::CleanExit) => return Ok(Startup::CleanExit),
                Err(source) => {
                    return Err(RuntimeError::Prep {
                        module: next.name().to_string(),
                        source,
                    });
                }
            }
        }
    }

    /// Starts every needed, prepped module in dependency order.
    ///
    /// Caller holds `mgmt_lock`.
    pub(super) async fn start_modules(&self) -> Result<(), RuntimeError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut in_flight = 0usize;

        loop {
            if self.shared.is_shutting_down() {
                return Err(RuntimeError::ShuttingDown);
            }
            let pending: Vec<Arc<Module>> = self
                .registry
                .snapshot()
                .into_iter()
                .filter(|m| {
                    m.needed() && m.status().is_prepped() && m.status() != ModuleStatus::Online
                })
                .collect();
            if pending.is_empty() && in_flight == 0 {
                return Ok(());
            }
            for m in &pending {
                if m.ready_to_start() && m.spawn_start(tx.clone()) {
                    in_flight += 1;
                }
            }
            if in_flight == 0 {
                return Err(RuntimeError::DependencyCycle {
                    modules: names(&pending),
                });
            }

            let report = tokio::select! {
                report = rx.recv() => report,
                _ = self.shared.shutdown.cancelled() => return Err(RuntimeError::ShuttingDown),
            };
            let Some(report) = report else {
                return Err(RuntimeError::ShuttingDown);
            };
            in_flight -= 1;
            if let Err(source) = report.result {
                return Err(RuntimeError::Start {
                    module: report.module.to_string(),
                    source,
                });
            }
        }
    }

    /// Stops modules in reverse dependency order.
    ///
    /// Caller holds `mgmt_lock`.
    pub(super) async fn stop_modules(&self, scope: StopScope) -> Result<(), RuntimeError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut in_flight = 0usize;
        let mut first_err: Option<RuntimeError> = None;

        loop {
            let changed = self.shared.status_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let targets: Vec<Arc<Module>> = self
                .registry
                .snapshot()
                .into_iter()
                .filter(|m| m.status().is_active() && scope.includes(m))
                .collect();
            if targets.is_empty() && in_flight == 0 {
                break;
            }
            for m in &targets {
                if m.ready_to_stop() && m.spawn_stop(tx.clone()) {
                    in_flight += 1;
                }
            }
            let transitioning = targets
                .iter()
                .any(|m| matches!(m.status(), ModuleStatus::Starting | ModuleStatus::Stopping));
            if in_flight == 0 && !transitioning {
                warn!(modules = ?names(&targets), "modules cannot be stopped; giving up");
                break;
            }

            tokio::select! {
                Some(report) = rx.recv(), if in_flight > 0 => {
                    in_flight -= 1;
                    if let Err(source) = report.result {
                        error!(module = %report.module, error = %source, "module stop failed");
                        first_err.get_or_insert(RuntimeError::Stop {
                            module: report.module.to_string(),
                            source,
                        });
                    }
                }
                _ = &mut changed => {}
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Stops every module and completes shutdown.
    ///
    /// The global shutdown token is cancelled exactly once. A second call waits for the
    /// first to finish and returns `Ok(())`. Stop errors do not interrupt the pass; the
    /// first one is returned and the exit code is set to `1` unless one was set.
    ///
    /// Must not be awaited from a `start` or `stop` hook (spawn it instead): shutdown waits
    /// for those hooks to finish.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.stopping.swap(true, Ordering::AcqRel) {
            self.shared.shutdown_done.cancelled().await;
            return Ok(());
        }
        info!("shutting down");
        self.shared
            .bus
            .publish(Event::new(EventKind::ShutdownRequested));
        self.shared.shutdown.cancel();

        let res = {
            let _guard = self.mgmt_lock.lock().await;
            self.stop_modules(StopScope::All).await
        };
        self.shared.tasks.clear();
        if let Err(e) = &res {
            self.shared.set_exit_code_if_unset(1);
            error!(error = %e, "shutdown completed with errors");
        }

        self.shared
            .bus
            .publish(Event::new(EventKind::ShutdownComplete));
        info!("shutdown complete");
        self.shared.shutdown_done.cancel();
        res
    }
}
