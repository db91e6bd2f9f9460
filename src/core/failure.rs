//! # Module failure status: hint, warning, error, resolve.
//!
//! Failure state is a health indicator independent of the lifecycle status. Raising a failure
//! with the id that is already current is a no-op; notifications run asynchronously on the
//! runtime so callers never block on user callbacks. Per module they are delivered one at a
//! time, in the order the state changed.
//!
//! ## Notification order
//! ```text
//! error(id, title, msg)
//!   ├─► change-notify(module)
//!   └─► failure-update(None, previous_id)   (only if a previous failure was set)
//!       failure-update(Error, id, title, msg)
//! ```

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::core::module::{Failure, FailureStatus, Module};
use crate::events::{Event, EventKind};

/// One pending failure notification: clear `previous`, then report `next`.
pub(crate) struct FailureNote {
    previous: Option<String>,
    next: Option<(FailureStatus, String, String, String)>,
}

/// Per-module queue of failure notifications.
#[derive(Default)]
pub(crate) struct FailureOutbox {
    notes: VecDeque<FailureNote>,
    draining: bool,
}

impl Module {
    /// Raises a hint. Ignored if `id` is the current failure id.
    pub fn hint(self: &Arc<Self>, id: &str, title: &str, msg: &str) {
        self.set_failure(FailureStatus::Hint, id, title, msg);
    }

    /// Raises a warning. Ignored if `id` is the current failure id.
    pub fn warning(self: &Arc<Self>, id: &str, title: &str, msg: &str) {
        self.set_failure(FailureStatus::Warning, id, title, msg);
    }

    /// Raises an error. Ignored if `id` is the current failure id.
    pub fn error(self: &Arc<Self>, id: &str, title: &str, msg: &str) {
        self.set_failure(FailureStatus::Error, id, title, msg);
    }

    /// Clears the failure state if `id` matches the current one, or unconditionally if `id` is empty.
    pub fn resolve(self: &Arc<Self>, id: &str) {
        let previous = {
            let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
            if failure.status == FailureStatus::None {
                return;
            }
            if !id.is_empty() && failure.id != id {
                return;
            }
            let previous = std::mem::take(&mut *failure).id;
            self.post_failure_note(FailureNote {
                previous: Some(previous.clone()),
                next: None,
            });
            previous
        };
        info!(module = %self.name, id = %previous, "failure resolved");
        self.shared.bus.publish(
            Event::new(EventKind::FailureResolved)
                .with_module(Arc::clone(&self.name))
                .with_unit(previous.as_str()),
        );
    }

    /// Returns the current failure status.
    pub fn failure_status(&self) -> FailureStatus {
        self.failure.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    /// Returns `(status, id, title, msg)` of the current failure.
    pub fn failure(&self) -> (FailureStatus, String, String, String) {
        let f = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        (f.status, f.id.clone(), f.title.clone(), f.msg.clone())
    }

    fn set_failure(self: &Arc<Self>, status: FailureStatus, id: &str, title: &str, msg: &str) {
        {
            let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
            if failure.id == id && failure.status != FailureStatus::None {
                return;
            }
            let next = Failure {
                status,
                id: id.to_string(),
                title: title.to_string(),
                msg: msg.to_string(),
            };
            let prev = std::mem::replace(&mut *failure, next);
            self.post_failure_note(FailureNote {
                previous: (prev.status != FailureStatus::None).then_some(prev.id),
                next: Some((status, id.to_string(), title.to_string(), msg.to_string())),
            });
        }
        warn!(
            module = %self.name,
            status = status.as_str(),
            id,
            title,
            msg,
            "failure status raised"
        );
        self.shared.bus.publish(
            Event::new(EventKind::FailureRaised)
                .with_module(Arc::clone(&self.name))
                .with_unit(id)
                .with_reason(title),
        );
    }

    /// Queues a notification in mutation order; one drain task runs at a time per module.
    ///
    /// Called with the failure lock held so outbox order matches state order.
    fn post_failure_note(self: &Arc<Self>, note: FailureNote) {
        let spawn = {
            let mut outbox = self.failure_outbox.lock().unwrap_or_else(|e| e.into_inner());
            outbox.notes.push_back(note);
            !std::mem::replace(&mut outbox.draining, true)
        };
        if spawn {
            let me = Arc::clone(self);
            self.shared.handle.spawn(async move { me.drain_failure_notes() });
        }
    }

    fn drain_failure_notes(&self) {
        loop {
            let note = {
                let mut outbox = self.failure_outbox.lock().unwrap_or_else(|e| e.into_inner());
                match outbox.notes.pop_front() {
                    Some(note) => note,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| self.deliver(note)));
            if delivered.is_err() {
                error!(module = %self.name, "failure notification callback panicked");
            }
        }
    }

    fn deliver(&self, note: FailureNote) {
        self.notify_change();
        let Some(update) = self.shared.failure_update() else {
            return;
        };
        if let Some(prev) = note.previous.filter(|p| !p.is_empty()) {
            update(FailureStatus::None, &prev, "", "");
        }
        if let Some((status, id, title, msg)) = note.next {
            update(status, &id, &title, &msg);
        }
    }
}
