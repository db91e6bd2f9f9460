//! # Task dispatchers and the execution protocol.
//!
//! ## Queue dispatcher
//! ```text
//! loop {
//!   ├─► wait for `filled` while both queues are empty
//!   ├─► acquire a TaskSlot clearance from the gate (cancellable by shutdown)
//!   ├─► pop prioritized, else plain
//!   └─► launch(task, Some(slot))
//! }
//! ```
//!
//! ## Schedule dispatcher
//! ```text
//! loop {
//!   ├─► sleep until the earliest deadline, or `recompute`
//!   └─► pop due entry ─► on_due: queued → launch(task, None)   (force-run, no slot)
//!                                else   → front of prioritized queue
//! }
//! ```
//!
//! ## Execution
//! `launch` claims the task (removes it from every list, marks it executing, derives a child
//! token from the module token), spawns the slot watchdog and the execution. The watchdog
//! releases the slot when the execution token is cancelled or after `max_execution_wait`,
//! whichever comes first; a stalled execution keeps running without a slot.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::module::LiveKind;
use crate::core::shared::Shared;
use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::fault::UnitKind;
use crate::microtasks::{Clearance, Gate, Tier};
use crate::tasks::TaskQueues;
use crate::tasks::task::{QueueKind, TaskInner};
use crate::workers::run_guarded;

/// Spawns the queue and schedule dispatchers; both exit on shutdown.
pub(crate) fn spawn_dispatchers(shared: &Arc<Shared>) {
    shared.handle.spawn(run_queue(
        Arc::clone(&shared.tasks),
        Arc::clone(&shared.gate),
        shared.shutdown.clone(),
    ));
    shared
        .handle
        .spawn(run_schedule(Arc::clone(&shared.tasks), shared.shutdown.clone()));
}

async fn run_queue(queues: Arc<TaskQueues>, gate: Arc<Gate>, shutdown: CancellationToken) {
    loop {
        let filled = queues.filled.notified();
        tokio::pin!(filled);
        filled.as_mut().enable();

        if queues.is_empty() {
            tokio::select! {
                _ = &mut filled => {}
                _ = shutdown.cancelled() => return,
            }
            continue;
        }

        let slot = tokio::select! {
            slot = gate.acquire(Tier::TaskSlot, None) => slot,
            _ = shutdown.cancelled() => return,
        };
        if shutdown.is_cancelled() {
            return;
        }
        if let Some(task) = queues.pop() {
            task.launch(Some(slot));
        }
    }
}

async fn run_schedule(queues: Arc<TaskQueues>, shutdown: CancellationToken) {
    loop {
        let recompute = queues.recompute.notified();
        tokio::pin!(recompute);
        recompute.as_mut().enable();

        match queues.next_deadline() {
            None => tokio::select! {
                _ = &mut recompute => {}
                _ = shutdown.cancelled() => return,
            },
            Some(at) if at > Instant::now() => tokio::select! {
                _ = tokio::time::sleep_until(at) => {}
                _ = &mut recompute => {}
                _ = shutdown.cancelled() => return,
            },
            Some(_) => {
                if let Some((at, task)) = queues.pop_due(Instant::now()) {
                    task.on_due(at);
                }
            }
        }
    }
}

impl TaskInner {
    /// Handles an elapsed schedule entry.
    fn on_due(self: &Arc<Self>, at: Instant) {
        let force = {
            let mut st = self.lock();
            if !st.scheduled || st.execute_at != Some(at) {
                return;
            }
            st.scheduled = false;
            st.execute_at = None;
            if st.canceled {
                return;
            }
            if st.executing {
                st.pending = Some(QueueKind::Prioritized);
                return;
            }
            if st.queued.is_some() {
                true
            } else {
                self.enqueue(&mut st, QueueKind::Prioritized, true);
                false
            }
        };
        if force {
            debug!(module = %self.module.name, task = %self.name, "max delay reached; running now");
            self.launch(None);
        }
    }

    /// Claims the task and spawns its execution. `slot` is released by the watchdog.
    pub(crate) fn launch(self: &Arc<Self>, slot: Option<Clearance>) {
        let shared = &self.module.shared;
        let module_token = self.module.token();
        let token = {
            let mut st = self.lock();
            if st.canceled || st.executing {
                return;
            }
            if let Some(kind) = st.queued.take() {
                shared.tasks.remove(kind, self);
            }
            if st.scheduled {
                shared.tasks.schedule_remove(self);
                st.scheduled = false;
            }
            st.execute_at = None;
            if module_token.is_cancelled() {
                debug!(module = %self.module.name, task = %self.name, "module stopping; task skipped");
                return;
            }
            st.executing = true;
            let token = module_token.child_token();
            st.token = Some(token.clone());
            token
        };

        if let Some(slot) = slot {
            let watched = token.clone();
            let ceiling = shared.cfg.max_execution_wait;
            shared.handle.spawn(async move {
                tokio::select! {
                    _ = watched.cancelled() => {}
                    _ = tokio::time::sleep(ceiling) => {}
                }
                drop(slot);
            });
        }

        let me = Arc::clone(self);
        shared.handle.spawn(async move { me.execute(token).await });
    }

    async fn execute(self: Arc<Self>, token: CancellationToken) {
        let res = {
            let _live = self.module.live_guard(LiveKind::Task);
            let f = Arc::clone(&self.f);
            let ctx = token.clone();
            run_guarded(&self.module, UnitKind::Task, &self.name, async move { f(ctx).await }).await
        };
        match &res {
            Ok(()) | Err(TaskError::Canceled) | Err(TaskError::Panicked(_)) => {}
            Err(e) => {
                warn!(module = %self.module.name, task = %self.name, error = %e, "task failed");
                self.module.shared.bus.publish(
                    Event::new(EventKind::TaskFailed)
                        .with_module(Arc::clone(&self.module.name))
                        .with_unit(self.name.as_str())
                        .with_reason(e.to_string()),
                );
            }
        }
        token.cancel();
        self.finish();
    }

    /// Clears the executing flag and re-arms pending queue requests and repeats.
    fn finish(self: &Arc<Self>) {
        let mut st = self.lock();
        st.executing = false;
        st.token = None;
        if st.canceled
            || self.module.token().is_cancelled()
            || self.module.shared.is_shutting_down()
        {
            st.pending = None;
            return;
        }
        if let Some(kind) = st.pending.take() {
            self.enqueue(&mut st, kind, kind == QueueKind::Prioritized);
        }
        if let Some(interval) = st.repeat {
            if !st.scheduled {
                self.set_schedule(&mut st, Instant::now() + interval);
            }
        }
    }
}
