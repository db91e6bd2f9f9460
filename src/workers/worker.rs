//! # Worker runtime.
//!
//! A worker runs one function with the module's cancellation token under panic recovery.
//! A *service* worker is restarted after every failure (panics included) with a linearly
//! growing delay, until it returns `Ok`, or the module starts stopping.
//!
//! ## Flow
//! ```text
//! live worker += 1
//! loop {
//!   ├─► attempt += 1
//!   ├─► run_guarded(f(module.token()))
//!   │     ├─ Ok                          → return Ok
//!   │     ├─ Canceled (token cancelled)  → return Ok
//!   │     └─ Err → publish WorkerFailed
//!   ├─► not a service, or module stopping → return Err
//!   ├─► delay = service_backoff.next(attempt); publish WorkerRestarting
//!   └─► sleep(delay) (cancellable by the module token)
//! }
//! live worker -= 1
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::module::{LiveKind, Module};
use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::fault::UnitKind;
use crate::workers::run_guarded;

impl Module {
    /// Runs a worker in place and returns its final result.
    ///
    /// With `service = true`, failures are retried until success or module stop; the last
    /// error is returned if the module stops first.
    pub async fn run_worker<F, Fut>(
        self: &Arc<Self>,
        name: &str,
        service: bool,
        f: F,
    ) -> Result<(), TaskError>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>>,
    {
        let kind = if service {
            UnitKind::ServiceWorker
        } else {
            UnitKind::Worker
        };
        self.run_worker_as(name, kind, service, f).await
    }

    /// Like [`Module::run_worker`], reporting faults under `kind`.
    pub(crate) async fn run_worker_as<F, Fut>(
        self: &Arc<Self>,
        name: &str,
        kind: UnitKind,
        service: bool,
        f: F,
    ) -> Result<(), TaskError>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>>,
    {
        let _live = self.live_guard(LiveKind::Worker);
        let mut attempt: u32 = 0;

        loop {
            let token = self.token();
            attempt = attempt.saturating_add(1);

            let err = match run_guarded(self, kind, name, async { f(token.clone()).await }).await {
                Ok(()) => return Ok(()),
                Err(TaskError::Canceled) if token.is_cancelled() => return Ok(()),
                Err(e) => e,
            };
            warn!(module = %self.name, worker = name, attempt, error = %err, "worker failed");
            self.shared.bus.publish(
                Event::new(EventKind::WorkerFailed)
                    .with_module(Arc::clone(&self.name))
                    .with_unit(name)
                    .with_reason(err.to_string())
                    .with_attempt(attempt),
            );

            if !service || token.is_cancelled() {
                return Err(err);
            }
            let delay = self.shared.cfg.service_backoff.next(attempt);
            info!(module = %self.name, worker = name, attempt, ?delay, "restarting service worker");
            self.shared.bus.publish(
                Event::new(EventKind::WorkerRestarting)
                    .with_module(Arc::clone(&self.name))
                    .with_unit(name)
                    .with_attempt(attempt)
                    .with_delay(delay),
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return Err(err),
            }
        }
    }

    /// Spawns a worker on the runtime and returns its handle.
    pub fn start_worker<F, Fut>(
        self: &Arc<Self>,
        name: impl Into<String>,
        service: bool,
        f: F,
    ) -> JoinHandle<Result<(), TaskError>>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let me = Arc::clone(self);
        let name = name.into();
        self.shared
            .handle
            .spawn(async move { me.run_worker(&name, service, f).await })
    }
}
