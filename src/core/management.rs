//! # Module management: start only what is enabled (plus its dependencies).
//!
//! With management on, a module takes part in start passes only if it is `enabled` or
//! `enabled_as_dependency`. Any change of an enabled flag requests a pass:
//!
//! ```text
//! Module::enable()/disable() ──► management_requested ──► management loop
//!                                                           └─► manage_modules()
//!                                                                 ├─► recompute dependency closure
//!                                                                 ├─► stop pass (Unneeded)
//!                                                                 └─► start pass
//! ```
//!
//! Passes are serialized with startup and shutdown through `mgmt_lock`.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use crate::core::lifecycle::StopScope;
use crate::core::module::Module;
use crate::core::runtime::Runtime;
use crate::error::RuntimeError;

impl Runtime {
    /// Turns module management on and installs a change-notification callback.
    ///
    /// The callback runs on every module status, failure or enabled-flag change.
    pub fn enable_module_management<F>(&self, change_notify: F)
    where
        F: Fn(&Module) + Send + Sync + 'static,
    {
        self.shared.set_change_notify(Some(Arc::new(change_notify)));
        if !self.shared.management.swap(true, Ordering::AcqRel) {
            info!("module management enabled");
            self.shared.management_requested.notify_one();
        }
    }

    /// True if module management is on.
    pub fn module_management_active(&self) -> bool {
        self.shared.management_enabled()
    }

    /// Runs one management pass: stops modules that are no longer needed and starts the
    /// newly needed ones, both in dependency order.
    ///
    /// No-op when management is off, before [`Runtime::start`], or during shutdown.
    pub async fn manage_modules(&self) -> Result<(), RuntimeError> {
        if !self.shared.management_enabled() || !self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.mgmt_lock.lock().await;
        if self.shared.is_shutting_down() {
            return Ok(());
        }
        debug!("running module management pass");
        self.recompute_dependency_closure();

        let stopped = self.stop_modules(StopScope::Unneeded).await;
        let started = match self.start_modules().await {
            Err(RuntimeError::ShuttingDown) => Ok(()),
            other => other,
        };
        stopped.and(started)
    }

    /// Marks every transitive dependency of an enabled module as enabled-as-dependency.
    pub(super) fn recompute_dependency_closure(&self) {
        let modules = self.registry.snapshot();
        let mut needed: HashSet<String> = HashSet::new();
        let mut stack: Vec<Arc<Module>> = modules.iter().filter(|m| m.enabled()).cloned().collect();
        while let Some(m) = stack.pop() {
            for dep in m.deps() {
                if needed.insert(dep.name().to_string()) {
                    stack.push(dep);
                }
            }
        }
        for m in &modules {
            m.set_enabled_as_dependency(needed.contains(m.name()));
        }
    }

    pub(super) fn spawn_management_loop(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let shared = Arc::clone(&self.shared);
        self.shared.handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.management_requested.notified() => {}
                    _ = shared.shutdown.cancelled() => break,
                }
                let Some(rt) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = rt.manage_modules().await {
                    warn!(error = %e, label = e.as_label(), "module management pass failed");
                }
            }
        });
    }
}
