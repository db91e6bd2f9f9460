//! # Module: a named unit with `prep`/`start`/`stop` hooks and declared dependencies.
//!
//! A [`Module`] is created by [`Runtime::register`](crate::Runtime::register) from a
//! [`ModuleSpec`] and lives for the whole lifetime of the runtime. Its status is driven
//! centrally by the orchestrator; module code only submits work (workers, tasks,
//! microtasks), raises failure states and toggles its enabled flag.
//!
//! ## Status machine
//! ```text
//! Dead ──prep──► Preparing ──► Offline ──start──► Starting ──► Online
//!   ▲                │            ▲                  │           │
//!   └──── prep err ──┘            ├──── start err ───┘         stop
//!                                 │                              ▼
//!                                 └────────────────────────── Stopping
//! ```
//!
//! ## Rules
//! - Status lives in a `watch` channel: transitions are compare-and-set, observers can await `Online`.
//! - Every start replaces the module's cancellation token with a fresh child of the global
//!   shutdown token; stop cancels it.
//! - Live worker/task/microtask counters are atomics guarded by RAII ([`LiveGuard`]).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::failure::FailureOutbox;
use crate::core::registry::Registry;
use crate::core::shared::Shared;
use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::fault::UnitKind;
use crate::hooks::EventHook;
use crate::workers::run_guarded;

/// Lifecycle hook: receives the module it belongs to.
pub(crate) type HookFn =
    Arc<dyn Fn(Arc<Module>) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// Lifecycle status of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// Registered, not prepared.
    Dead,
    /// `prep` hook running.
    Preparing,
    /// Prepared (or stopped) and not running.
    Offline,
    /// `start` hook running.
    Starting,
    /// Started successfully.
    Online,
    /// `stop` hook running, live work draining.
    Stopping,
}

impl ModuleStatus {
    /// Returns the lowercase status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Dead => "dead",
            ModuleStatus::Preparing => "preparing",
            ModuleStatus::Offline => "offline",
            ModuleStatus::Starting => "starting",
            ModuleStatus::Online => "online",
            ModuleStatus::Stopping => "stopping",
        }
    }

    /// True once `prep` has completed successfully.
    #[inline]
    pub fn is_prepped(&self) -> bool {
        !matches!(self, ModuleStatus::Dead | ModuleStatus::Preparing)
    }

    /// True while the module is starting, online or stopping.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ModuleStatus::Starting | ModuleStatus::Online | ModuleStatus::Stopping
        )
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health indicator of a module, independent of its lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStatus {
    /// Healthy.
    #[default]
    None,
    /// Informational hint.
    Hint,
    /// Degraded.
    Warning,
    /// Broken.
    Error,
}

impl FailureStatus {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStatus::None => "none",
            FailureStatus::Hint => "hint",
            FailureStatus::Warning => "warning",
            FailureStatus::Error => "error",
        }
    }
}

/// Registration data of a module: hooks and dependency names.
///
/// Missing hooks are no-ops.
///
/// ## Example
/// ```rust
/// use modvisor::{ModuleSpec, TaskError};
///
/// let spec = ModuleSpec::new()
///     .depends_on(["database", "cache"])
///     .start(|_m| async { Ok::<_, TaskError>(()) });
/// ```
#[derive(Default, Clone)]
pub struct ModuleSpec {
    pub(crate) prep: Option<HookFn>,
    pub(crate) start: Option<HookFn>,
    pub(crate) stop: Option<HookFn>,
    pub(crate) deps: Vec<String>,
}

fn boxed_hook<F, Fut>(f: F) -> HookFn
where
    F: Fn(Arc<Module>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Arc::new(move |m| f(m).boxed())
}

impl ModuleSpec {
    /// Creates an empty spec (no hooks, no dependencies).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `prep` hook. Returning [`TaskError::CleanExit`] ends startup without failure.
    pub fn prep<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Module>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.prep = Some(boxed_hook(f));
        self
    }

    /// Sets the `start` hook.
    pub fn start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Module>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.start = Some(boxed_hook(f));
        self
    }

    /// Sets the `stop` hook.
    pub fn stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Module>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.stop = Some(boxed_hook(f));
        self
    }

    /// Adds dependency names.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// Resolved graph edges of a module.
#[derive(Default)]
pub(crate) struct Graph {
    pub(crate) deps: Vec<Arc<Module>>,
    pub(crate) dependents: Vec<Weak<Module>>,
}

#[derive(Default)]
pub(crate) struct Failure {
    pub(crate) status: FailureStatus,
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) msg: String,
}

/// Outcome of a module transition, sent back to the orchestrator loop.
pub(crate) struct Report {
    pub(crate) module: Arc<str>,
    pub(crate) result: Result<(), TaskError>,
}

/// Kind of live work tracked per module.
#[derive(Clone, Copy, Debug)]
pub(crate) enum LiveKind {
    Worker,
    Task,
    MicroTask,
}

#[derive(Default)]
pub(crate) struct LiveCounters {
    workers: AtomicUsize,
    tasks: AtomicUsize,
    microtasks: AtomicUsize,
    idle: Notify,
}

impl LiveCounters {
    fn counter(&self, kind: LiveKind) -> &AtomicUsize {
        match kind {
            LiveKind::Worker => &self.workers,
            LiveKind::Task => &self.tasks,
            LiveKind::MicroTask => &self.microtasks,
        }
    }

    pub(crate) fn workers(&self) -> usize {
        self.workers.load(Ordering::Acquire)
    }

    pub(crate) fn tasks(&self) -> usize {
        self.tasks.load(Ordering::Acquire)
    }

    pub(crate) fn microtasks(&self) -> usize {
        self.microtasks.load(Ordering::Acquire)
    }

    fn total(&self) -> usize {
        self.workers() + self.tasks() + self.microtasks()
    }
}

/// RAII guard: counts one unit of live work for a module.
pub(crate) struct LiveGuard {
    module: Arc<Module>,
    kind: LiveKind,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let live = &self.module.live;
        live.counter(self.kind).fetch_sub(1, Ordering::AcqRel);
        if live.total() == 0 {
            live.idle.notify_waiters();
        }
    }
}

/// A registered module.
///
/// Handles are `Arc<Module>`; the same instance is passed to the lifecycle hooks.
pub struct Module {
    pub(crate) name: Arc<str>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) registry: Weak<Registry>,
    prep_fn: Option<HookFn>,
    start_fn: Option<HookFn>,
    stop_fn: Option<HookFn>,
    pub(crate) dep_names: Vec<String>,
    pub(crate) graph: RwLock<Graph>,
    status: watch::Sender<ModuleStatus>,
    token: Mutex<CancellationToken>,
    enabled: AtomicBool,
    enabled_as_dependency: AtomicBool,
    pub(crate) failure: Mutex<Failure>,
    pub(crate) failure_outbox: Mutex<FailureOutbox>,
    pub(crate) live: LiveCounters,
    pub(crate) events: Mutex<HashMap<String, Vec<EventHook>>>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("deps", &self.dep_names)
            .finish()
    }
}

impl Module {
    pub(crate) fn new(
        name: &str,
        spec: ModuleSpec,
        shared: Arc<Shared>,
        registry: Weak<Registry>,
    ) -> Self {
        let (status, _rx) = watch::channel(ModuleStatus::Dead);
        let token = shared.shutdown.child_token();
        Self {
            name: Arc::from(name),
            shared,
            registry,
            prep_fn: spec.prep,
            start_fn: spec.start,
            stop_fn: spec.stop,
            dep_names: spec.deps,
            graph: RwLock::new(Graph::default()),
            status,
            token: Mutex::new(token),
            enabled: AtomicBool::new(false),
            enabled_as_dependency: AtomicBool::new(false),
            failure: Mutex::new(Failure::default()),
            failure_outbox: Mutex::new(FailureOutbox::default()),
            live: LiveCounters::default(),
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared dependency names.
    pub fn dependency_names(&self) -> &[String] {
        &self.dep_names
    }

    /// Returns the current lifecycle status.
    pub fn status(&self) -> ModuleStatus {
        *self.status.borrow()
    }

    /// True if the module is online.
    pub fn online(&self) -> bool {
        self.status() == ModuleStatus::Online
    }

    /// True if the module is online or about to be (starting).
    pub fn online_soon(&self) -> bool {
        matches!(self.status(), ModuleStatus::Online | ModuleStatus::Starting)
    }

    /// Returns a receiver observing status transitions.
    pub fn watch_status(&self) -> watch::Receiver<ModuleStatus> {
        self.status.subscribe()
    }

    /// Returns the module's current cancellation token.
    ///
    /// The token is cancelled when the module begins to stop or the runtime shuts down.
    pub fn token(&self) -> CancellationToken {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// True if the module's context is cancelled.
    pub fn is_stopping(&self) -> bool {
        self.status() == ModuleStatus::Stopping || self.token().is_cancelled()
    }

    /// Live worker count.
    pub fn workers(&self) -> usize {
        self.live.workers()
    }

    /// Live task execution count.
    pub fn tasks(&self) -> usize {
        self.live.tasks()
    }

    /// Live microtask count.
    pub fn microtasks(&self) -> usize {
        self.live.microtasks()
    }

    pub(crate) fn live_guard(self: &Arc<Self>, kind: LiveKind) -> LiveGuard {
        self.live.counter(kind).fetch_add(1, Ordering::AcqRel);
        LiveGuard {
            module: Arc::clone(self),
            kind,
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.live.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.live.total() == 0 {
                return;
            }
            notified.await;
        }
    }

    // === Management flags ===

    /// True if the module was explicitly enabled.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// True if an enabled module (transitively) depends on this one.
    pub fn enabled_as_dependency(&self) -> bool {
        self.enabled_as_dependency.load(Ordering::Acquire)
    }

    /// Enables the module. Returns `true` if the flag changed.
    pub fn enable(&self) -> bool {
        self.set_enabled(true)
    }

    /// Disables the module. Returns `true` if the flag changed.
    pub fn disable(&self) -> bool {
        self.set_enabled(false)
    }

    /// Sets the enabled flag and requests a management pass if it changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let changed = self.enabled.swap(enabled, Ordering::AcqRel) != enabled;
        if changed {
            debug!(module = %self.name, enabled, "module enabled flag changed");
            self.notify_change();
            self.shared.request_management();
        }
        changed
    }

    pub(crate) fn set_enabled_as_dependency(&self, v: bool) {
        self.enabled_as_dependency.store(v, Ordering::Release);
    }

    /// True if the module should run under the current management mode.
    pub(crate) fn needed(&self) -> bool {
        !self.shared.management_enabled() || self.enabled() || self.enabled_as_dependency()
    }

    pub(crate) fn notify_change(&self) {
        if let Some(f) = self.shared.change_notify() {
            f(self);
        }
    }

    // === Graph readiness ===

    pub(crate) fn deps(&self) -> Vec<Arc<Module>> {
        self.graph
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .deps
            .clone()
    }

    pub(crate) fn dependents(&self) -> Vec<Arc<Module>> {
        self.graph
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .dependents
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Dead, and every dependency prepped.
    pub(crate) fn ready_to_prep(&self) -> bool {
        self.status() == ModuleStatus::Dead && self.deps().iter().all(|d| d.status().is_prepped())
    }

    /// Offline, and every dependency online.
    pub(crate) fn ready_to_start(&self) -> bool {
        self.status() == ModuleStatus::Offline
            && self
                .deps()
                .iter()
                .all(|d| d.status() == ModuleStatus::Online)
    }

    /// Online, and no dependent starting, online or stopping.
    pub(crate) fn ready_to_stop(&self) -> bool {
        self.status() == ModuleStatus::Online
            && !self.dependents().iter().any(|d| d.status().is_active())
    }

    // === Transitions ===

    /// Moves to `to` if the current status is `from`.
    fn transition(&self, from: ModuleStatus, to: ModuleStatus) -> bool {
        let moved = self.status.send_if_modified(|s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        });
        if moved {
            self.shared.status_changed.notify_waiters();
            self.notify_change();
        }
        moved
    }

    fn publish(&self, kind: EventKind) {
        self.shared
            .bus
            .publish(Event::new(kind).with_module(Arc::clone(&self.name)));
    }

    fn publish_failed(&self, hook: &'static str, err: &TaskError) {
        self.shared.bus.publish(
            Event::new(EventKind::ModuleFailed)
                .with_module(Arc::clone(&self.name))
                .with_unit(hook)
                .with_reason(err.to_string()),
        );
    }

    async fn run_hook(
        self: &Arc<Self>,
        hook: Option<&HookFn>,
        kind: UnitKind,
    ) -> Result<(), TaskError> {
        match hook {
            Some(f) => {
                let f = Arc::clone(f);
                let me = Arc::clone(self);
                run_guarded(self, kind, kind.as_str(), async move { f(me).await }).await
            }
            None => Ok(()),
        }
    }

    /// Runs the `prep` hook in place.
    ///
    /// On error the module returns to `Dead`.
    pub(crate) async fn prep(self: &Arc<Self>) -> Result<(), TaskError> {
        if !self.transition(ModuleStatus::Dead, ModuleStatus::Preparing) {
            return Ok(());
        }
        self.publish(EventKind::ModulePreparing);
        debug!(module = %self.name, "preparing");

        let res = self.run_hook(self.prep_fn.as_ref(), UnitKind::Prep).await;
        match &res {
            Ok(()) => {
                self.transition(ModuleStatus::Preparing, ModuleStatus::Offline);
            }
            Err(e) => {
                self.transition(ModuleStatus::Preparing, ModuleStatus::Dead);
                if !matches!(e, TaskError::CleanExit) {
                    self.publish_failed("prep", e);
                }
            }
        }
        res
    }

    /// Starts the module concurrently; the outcome is sent to `reports`.
    ///
    /// Returns `false` if the module was not offline.
    pub(crate) fn spawn_start(self: &Arc<Self>, reports: mpsc::UnboundedSender<Report>) -> bool {
        if !self.transition(ModuleStatus::Offline, ModuleStatus::Starting) {
            return false;
        }
        let token = self.shared.shutdown.child_token();
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        self.publish(EventKind::ModuleStarting);
        info!(module = %self.name, "starting");

        let me = Arc::clone(self);
        self.shared.handle.spawn(async move {
            let res = me.run_hook(me.start_fn.as_ref(), UnitKind::Start).await;
            match &res {
                Ok(()) => {
                    me.transition(ModuleStatus::Starting, ModuleStatus::Online);
                    me.publish(EventKind::ModuleOnline);
                    info!(module = %me.name, "online");
                }
                Err(e) => {
                    token.cancel();
                    me.transition(ModuleStatus::Starting, ModuleStatus::Offline);
                    me.publish_failed("start", e);
                    warn!(module = %me.name, error = %e, "failed to start");
                }
            }
            let _ = reports.send(Report {
                module: Arc::clone(&me.name),
                result: res,
            });
        });
        true
    }

    /// Stops the module concurrently; the outcome is sent to `reports`.
    ///
    /// The stop hook and the drain of live work share one `module_stop_timeout` deadline.
    /// Returns `false` if the module was not online.
    pub(crate) fn spawn_stop(self: &Arc<Self>, reports: mpsc::UnboundedSender<Report>) -> bool {
        if !self.transition(ModuleStatus::Online, ModuleStatus::Stopping) {
            return false;
        }
        self.token().cancel();
        self.publish(EventKind::ModuleStopping);
        info!(module = %self.name, "stopping");

        let me = Arc::clone(self);
        let limit = self.shared.cfg.module_stop_timeout;
        self.shared.handle.spawn(async move {
            let stopping = async {
                let res = me.run_hook(me.stop_fn.as_ref(), UnitKind::Stop).await;
                me.wait_idle().await;
                res
            };
            let res = match tokio::time::timeout(limit, stopping).await {
                Ok(res) => res,
                Err(_elapsed) => {
                    warn!(
                        module = %me.name,
                        workers = me.workers(),
                        tasks = me.tasks(),
                        microtasks = me.microtasks(),
                        "timed out waiting for stop hook and live work to finish"
                    );
                    Ok(())
                }
            };
            if let Err(e) = &res {
                me.publish_failed("stop", e);
                warn!(module = %me.name, error = %e, "failed to stop");
            }
            me.transition(ModuleStatus::Stopping, ModuleStatus::Offline);
            me.publish(EventKind::ModuleOffline);
            info!(module = %me.name, "offline");
            let _ = reports.send(Report {
                module: Arc::clone(&me.name),
                result: res,
            });
        });
        true
    }
}
