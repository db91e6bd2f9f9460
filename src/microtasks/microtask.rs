//! # Microtask entry points on [`Module`].

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::module::{LiveKind, Module};
use crate::error::TaskError;
use crate::fault::UnitKind;
use crate::microtasks::{Clearance, Tier};
use crate::workers::run_guarded;

impl Module {
    /// Runs a high priority microtask: admitted immediately, still counted against the cap.
    pub async fn start_microtask<F, Fut>(self: &Arc<Self>, name: &str, f: F) -> Result<(), TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>>,
    {
        let clearance = self.shared.gate.admit();
        self.run_microtask(name, clearance, f).await
    }

    /// Runs a medium priority microtask: waits for a clearance up to `medium_priority_max_wait`,
    /// then runs regardless.
    pub async fn start_medium_priority_microtask<F, Fut>(
        self: &Arc<Self>,
        name: &str,
        f: F,
    ) -> Result<(), TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>>,
    {
        let wait = self.shared.cfg.medium_priority_max_wait;
        let clearance = self.shared.gate.acquire(Tier::Medium, Some(wait)).await;
        self.run_microtask(name, clearance, f).await
    }

    /// Runs a low priority microtask: waits for a clearance up to `low_priority_max_wait`,
    /// then runs regardless.
    pub async fn start_low_priority_microtask<F, Fut>(
        self: &Arc<Self>,
        name: &str,
        f: F,
    ) -> Result<(), TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>>,
    {
        let wait = self.shared.cfg.low_priority_max_wait;
        let clearance = self.shared.gate.acquire(Tier::Low, Some(wait)).await;
        self.run_microtask(name, clearance, f).await
    }

    async fn run_microtask<F, Fut>(
        self: &Arc<Self>,
        name: &str,
        clearance: Clearance,
        f: F,
    ) -> Result<(), TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>>,
    {
        let _live = self.live_guard(LiveKind::MicroTask);
        let _clearance = clearance;
        let token = self.token();
        let res = run_guarded(self, UnitKind::MicroTask, name, async move { f(token).await }).await;
        if let Err(e) = &res {
            if !matches!(e, TaskError::Canceled | TaskError::Panicked(_)) {
                warn!(module = %self.name, microtask = name, error = %e, "microtask failed");
            }
        }
        res
    }
}
