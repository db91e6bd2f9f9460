use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::tasks::task::{QueueKind, TaskInner};

type List = Mutex<VecDeque<Arc<TaskInner>>>;

/// Global task lists.
pub(crate) struct TaskQueues {
    plain: List,
    prioritized: List,
    /// Ordered by ascending deadline; equal deadlines keep insertion order.
    schedule: Mutex<VecDeque<(Instant, Arc<TaskInner>)>>,
    /// Signalled when a queue receives a task.
    pub(crate) filled: Notify,
    /// Signalled when the schedule list changes.
    pub(crate) recompute: Notify,
}

impl TaskQueues {
    pub(crate) fn new() -> Self {
        Self {
            plain: Mutex::new(VecDeque::new()),
            prioritized: Mutex::new(VecDeque::new()),
            schedule: Mutex::new(VecDeque::new()),
            filled: Notify::new(),
            recompute: Notify::new(),
        }
    }

    fn list(&self, kind: QueueKind) -> &List {
        match kind {
            QueueKind::Plain => &self.plain,
            QueueKind::Prioritized => &self.prioritized,
        }
    }

    pub(crate) fn push_back(&self, kind: QueueKind, task: &Arc<TaskInner>) {
        self.list(kind)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Arc::clone(task));
        self.filled.notify_one();
    }

    pub(crate) fn push_front(&self, kind: QueueKind, task: &Arc<TaskInner>) {
        self.list(kind)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_front(Arc::clone(task));
        self.filled.notify_one();
    }

    pub(crate) fn remove(&self, kind: QueueKind, task: &Arc<TaskInner>) {
        self.list(kind)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|t| !Arc::ptr_eq(t, task));
    }

    /// Pops the front of the prioritized queue, else of the plain queue.
    pub(crate) fn pop(&self) -> Option<Arc<TaskInner>> {
        let next = self
            .prioritized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.or_else(|| {
            self.plain
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.prioritized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
            && self.plain.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// Inserts (or repositions) `task` at `at`.
    pub(crate) fn schedule_insert(&self, at: Instant, task: &Arc<TaskInner>) {
        {
            let mut list = self.schedule.lock().unwrap_or_else(|e| e.into_inner());
            list.retain(|(_, t)| !Arc::ptr_eq(t, task));
            let pos = list.partition_point(|(deadline, _)| *deadline <= at);
            list.insert(pos, (at, Arc::clone(task)));
        }
        self.recompute.notify_one();
    }

    pub(crate) fn schedule_remove(&self, task: &Arc<TaskInner>) {
        self.schedule
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(_, t)| !Arc::ptr_eq(t, task));
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.schedule
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .front()
            .map(|(at, _)| *at)
    }

    /// Pops the earliest entry if its deadline has passed.
    pub(crate) fn pop_due(&self, now: Instant) -> Option<(Instant, Arc<TaskInner>)> {
        let mut list = self.schedule.lock().unwrap_or_else(|e| e.into_inner());
        match list.front() {
            Some((at, _)) if *at <= now => list.pop_front(),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> (usize, usize, usize) {
        (
            self.plain.lock().unwrap_or_else(|e| e.into_inner()).len(),
            self.prioritized
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            self.schedule.lock().unwrap_or_else(|e| e.into_inner()).len(),
        )
    }

    /// Drops every entry. Used at shutdown to release task handles.
    pub(crate) fn clear(&self) {
        self.plain.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.prioritized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.schedule.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
