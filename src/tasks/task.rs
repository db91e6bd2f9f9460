//! # Task handle.
//!
//! A [`Task`] is a schedulable, cancelable, optionally repeating unit of work bound to a
//! module. Scheduling calls return `&Task` so they chain:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use modvisor::{Module, TaskError};
//!
//! fn install(m: &Arc<Module>) {
//!     m.new_task("refresh", |_ctx| async { Ok::<_, TaskError>(()) })
//!         .max_delay(Duration::from_secs(30))
//!         .repeat(Duration::from_secs(60));
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::module::Module;
use crate::error::TaskError;

pub(crate) type TaskFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// Queue a task sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueKind {
    Plain,
    Prioritized,
}

pub(crate) struct TaskState {
    pub(crate) queued: Option<QueueKind>,
    /// Queue request received while executing; applied on completion.
    pub(crate) pending: Option<QueueKind>,
    pub(crate) scheduled: bool,
    pub(crate) canceled: bool,
    pub(crate) executing: bool,
    pub(crate) execute_at: Option<Instant>,
    pub(crate) repeat: Option<Duration>,
    pub(crate) max_delay: Duration,
    pub(crate) token: Option<CancellationToken>,
}

pub(crate) struct TaskInner {
    pub(crate) name: String,
    pub(crate) module: Arc<Module>,
    pub(crate) f: TaskFn,
    state: Mutex<TaskState>,
}

impl TaskInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Puts the task into `kind` (front or back) and arms its max-delay deadline.
    ///
    /// Never downgrades a prioritized task to the plain queue.
    pub(crate) fn enqueue(self: &Arc<Self>, st: &mut TaskState, kind: QueueKind, front: bool) {
        if st.canceled {
            return;
        }
        if st.executing {
            if st.pending != Some(QueueKind::Prioritized) {
                st.pending = Some(kind);
            }
            return;
        }
        let queues = &self.module.shared.tasks;
        match (st.queued, kind) {
            (Some(QueueKind::Prioritized), QueueKind::Plain) => {}
            (Some(current), _) if current == kind && !front => {}
            (current, _) => {
                if let Some(current) = current {
                    queues.remove(current, self);
                }
                if front {
                    queues.push_front(kind, self);
                } else {
                    queues.push_back(kind, self);
                }
                st.queued = Some(kind);
            }
        }

        if !st.max_delay.is_zero() {
            let deadline = Instant::now() + st.max_delay;
            let earlier = match (st.scheduled, st.execute_at) {
                (true, Some(at)) => deadline < at,
                _ => true,
            };
            if earlier {
                self.set_schedule(st, deadline);
            }
        }
    }

    pub(crate) fn set_schedule(self: &Arc<Self>, st: &mut TaskState, at: Instant) {
        st.execute_at = Some(at);
        st.scheduled = true;
        self.module.shared.tasks.schedule_insert(at, self);
    }
}

/// Handle to a task. Cheap to clone; all clones refer to the same task.
#[derive(Clone)]
pub struct Task {
    pub(crate) inner: Arc<TaskInner>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.lock();
        f.debug_struct("Task")
            .field("module", &self.inner.module.name())
            .field("name", &self.inner.name)
            .field("queued", &st.queued)
            .field("scheduled", &st.scheduled)
            .field("executing", &st.executing)
            .field("canceled", &st.canceled)
            .finish()
    }
}

impl Module {
    /// Creates a task bound to this module. The task is inert until it is queued or scheduled.
    pub fn new_task<F, Fut>(self: &Arc<Self>, name: impl Into<String>, f: F) -> Task
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let state = TaskState {
            queued: None,
            pending: None,
            scheduled: false,
            canceled: false,
            executing: false,
            execute_at: None,
            repeat: None,
            max_delay: self.shared.cfg.default_max_delay,
            token: None,
        };
        Task {
            inner: Arc::new(TaskInner {
                name: name.into(),
                module: Arc::clone(self),
                f: Arc::new(move |ctx| f(ctx).boxed()),
                state: Mutex::new(state),
            }),
        }
    }
}

impl Task {
    /// Returns the task name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the owning module.
    pub fn module(&self) -> &Arc<Module> {
        &self.inner.module
    }

    /// Appends the task to the plain queue (no-op if already queued).
    pub fn queue(&self) -> &Self {
        let mut st = self.inner.lock();
        self.inner.enqueue(&mut st, QueueKind::Plain, false);
        self
    }

    /// Appends the task to the prioritized queue (moves it out of the plain queue).
    pub fn prioritize(&self) -> &Self {
        let mut st = self.inner.lock();
        self.inner.enqueue(&mut st, QueueKind::Prioritized, false);
        self
    }

    /// Moves the task to the front of the prioritized queue.
    pub fn start_asap(&self) -> &Self {
        let mut st = self.inner.lock();
        self.inner.enqueue(&mut st, QueueKind::Prioritized, true);
        self
    }

    /// Schedules the task to be queued (front of the prioritized queue) at `at`.
    pub fn schedule(&self, at: Instant) -> &Self {
        let mut st = self.inner.lock();
        if !st.canceled {
            self.inner.set_schedule(&mut st, at);
        }
        self
    }

    /// Runs the task every `interval` (raised to the configured minimum), starting one
    /// interval from now. Each completion schedules the next run.
    pub fn repeat(&self, interval: Duration) -> &Self {
        let interval = self.inner.module.shared.cfg.repeat_clamped(interval);
        let mut st = self.inner.lock();
        if st.canceled {
            return self;
        }
        st.repeat = Some(interval);
        if !st.executing {
            self.inner.set_schedule(&mut st, Instant::now() + interval);
        }
        self
    }

    /// Sets the longest time a queued task may wait before it is force-run (`ZERO` = unbounded).
    pub fn max_delay(&self, d: Duration) -> &Self {
        self.inner.lock().max_delay = d;
        self
    }

    /// Cancels the task permanently. A running execution has its token cancelled.
    pub fn cancel(&self) {
        let mut st = self.inner.lock();
        if st.canceled {
            return;
        }
        st.canceled = true;
        st.pending = None;
        st.repeat = None;
        if let Some(token) = st.token.take() {
            token.cancel();
        }
        let queues = &self.inner.module.shared.tasks;
        if let Some(kind) = st.queued.take() {
            queues.remove(kind, &self.inner);
        }
        if st.scheduled {
            queues.schedule_remove(&self.inner);
            st.scheduled = false;
            st.execute_at = None;
        }
    }

    /// True once [`Task::cancel`] was called.
    pub fn is_canceled(&self) -> bool {
        self.inner.lock().canceled
    }

    /// True while an execution is running.
    pub fn is_executing(&self) -> bool {
        self.inner.lock().executing
    }

    /// True while the task sits in a queue.
    pub fn is_queued(&self) -> bool {
        self.inner.lock().queued.is_some()
    }

    /// True while the task sits in the schedule list.
    pub fn is_scheduled(&self) -> bool {
        self.inner.lock().scheduled
    }
}
