//! # Runtime: owns the module registry and drives the lifecycle.
//!
//! The [`Runtime`] is the single entry point of the crate. An embedding application builds
//! one instance, registers its modules, calls [`Runtime::start`] and eventually
//! [`Runtime::shutdown`] (or lets [`Runtime::run_until_signal`] do both).
//!
//! ## High-level architecture
//! ```text
//! RuntimeBuilder::build()
//!   ├─► Bus ──► subscriber listener ──► SubscriberSet ──► Subscribe::on_event
//!   ├─► Gate::run             (microtask admission loop)
//!   └─► task dispatchers      (queue + schedule)
//!
//! register(name, ModuleSpec) ──► Registry
//!
//! start():
//!   resolve graph ─► global prep ─► prep (sequential) ─► start (concurrent fixed point)
//!                                                          └─► management loop
//! shutdown():
//!   ShutdownRequested ─► cancel global token ─► stop (concurrent fixed point)
//!                     ─► clear task lists ─► ShutdownComplete ─► shutdown_done
//! ```
//!
//! ## Example
//! ```no_run
//! use modvisor::{Config, ModuleSpec, Runtime, TaskError};
//!
//! #[tokio::main]
//! async fn main() {
//!     let rt = Runtime::new(Config::default());
//!
//!     rt.register("database", ModuleSpec::new().start(|_m| async { Ok::<_, TaskError>(()) }));
//!     rt.register(
//!         "api",
//!         ModuleSpec::new()
//!             .depends_on(["database"])
//!             .start(|m| async move {
//!                 m.start_worker("listener", true, |ctx| async move {
//!                     ctx.cancelled().await;
//!                     Ok(())
//!                 });
//!                 Ok(())
//!             }),
//!     );
//!
//!     let code = rt.run_until_signal().await.unwrap_or(1);
//!     std::process::exit(code);
//! }
//! ```

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::builder::RuntimeBuilder;
use crate::core::lifecycle::Startup;
use crate::core::module::{FailureStatus, Module, ModuleSpec};
use crate::core::registry::Registry;
use crate::core::shared::Shared;
use crate::core::shutdown;
use crate::error::{RuntimeError, TaskError};
use crate::events::Event;
use crate::fault::Fault;

pub(crate) type GlobalPrepFn =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<(), TaskError>> + Send>;

/// Owns the modules and coordinates their lifecycle and work.
pub struct Runtime {
    pub(super) shared: Arc<Shared>,
    pub(super) registry: Arc<Registry>,
    pub(super) started: AtomicBool,
    pub(super) stopping: AtomicBool,
    pub(super) global_prep: Mutex<Option<GlobalPrepFn>>,
    /// Serializes startup, management passes and shutdown.
    pub(super) mgmt_lock: tokio::sync::Mutex<()>,
}

impl Runtime {
    /// Returns a builder.
    pub fn builder(cfg: Config) -> RuntimeBuilder {
        RuntimeBuilder::new(cfg)
    }

    /// Builds a runtime without subscribers.
    ///
    /// # Panics
    /// Panics if called outside of a tokio runtime.
    pub fn new(cfg: Config) -> Arc<Self> {
        RuntimeBuilder::new(cfg).build()
    }

    pub(super) fn new_internal(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            registry: Registry::new(),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            global_prep: Mutex::new(None),
            mgmt_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Registers a module. A name that is already registered is replaced (last write wins).
    pub fn register(&self, name: &str, spec: ModuleSpec) -> Arc<Module> {
        self.registry
            .register(name, spec, Arc::clone(&self.shared))
    }

    /// Looks up a module by name.
    pub fn module(&self, name: &str) -> Option<Arc<Module>> {
        self.registry.get(name)
    }

    /// Returns all modules in registration order.
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.registry.snapshot()
    }

    /// Returns the runtime configuration.
    pub fn config(&self) -> &Config {
        &self.shared.cfg
    }

    /// Subscribes to the runtime event bus directly.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    /// Sets a function that runs once before any module's `prep` hook.
    ///
    /// Returning [`TaskError::CleanExit`] ends startup without failure.
    pub fn set_global_prep_fn<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let boxed: GlobalPrepFn = Box::new(move || f().boxed());
        *self.global_prep.lock().unwrap_or_else(|e| e.into_inner()) = Some(boxed);
    }

    /// Routes recovered panics to `tx` (non-blocking; faults are dropped when the channel is full).
    pub fn set_error_reporting(&self, tx: mpsc::Sender<Fault>) {
        self.shared.set_reporter(Some(tx));
    }

    /// Sets the callback receiving failure status updates `(status, id, title, msg)`.
    pub fn set_failure_update_fn<F>(&self, f: F)
    where
        F: Fn(FailureStatus, &str, &str, &str) + Send + Sync + 'static,
    {
        self.shared.set_failure_update(Some(Arc::new(f)));
    }

    /// Sets the microtask concurrency threshold (raised to the configured floor).
    pub fn set_max_concurrent_microtasks(&self, n: usize) {
        let applied = self.shared.gate.set_threshold(n);
        info!(requested = n, applied, "microtask threshold updated");
    }

    /// Returns the effective microtask concurrency threshold.
    pub fn max_concurrent_microtasks(&self) -> usize {
        self.shared.gate.threshold()
    }

    /// Returns a token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// True once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Sets the process exit code reported by [`Runtime::exit_status_code`].
    pub fn set_exit_status_code(&self, code: i32) {
        self.shared.set_exit_code(code);
    }

    /// Waits for shutdown to complete and returns the exit code (`0` if never set).
    pub async fn exit_status_code(&self) -> i32 {
        self.shared.shutdown_done.cancelled().await;
        self.shared.exit_code()
    }

    /// Starts all modules, waits for a termination signal (or a shutdown started elsewhere),
    /// shuts down and returns the exit code.
    pub async fn run_until_signal(self: &Arc<Self>) -> Result<i32, RuntimeError> {
        if self.start().await? == Startup::CleanExit {
            return Ok(self.exit_status_code().await);
        }
        let token = self.shared.shutdown.clone();
        tokio::select! {
            res = shutdown::wait_for_shutdown_signal() => match res {
                Ok(()) => info!("termination signal received"),
                Err(e) => {
                    warn!(error = %e, "failed to register signal handlers; waiting for shutdown");
                    token.cancelled().await;
                }
            },
            _ = token.cancelled() => {}
        }
        if let Err(e) = self.shutdown().await {
            warn!(error = %e, "shutdown finished with errors");
        }
        Ok(self.exit_status_code().await)
    }
}
