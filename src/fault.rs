//! # Recovered panics.
//!
//! Every execution boundary (module hook, worker, task, microtask, event hook) runs its
//! future under `catch_unwind`. A caught panic becomes a [`Fault`]: module and unit identity,
//! the panic payload and a backtrace.
//!
//! ## Backtraces
//! A process-wide panic hook (installed once, chained to the previous hook) captures the
//! backtrace on the panicking thread and parks it in a thread-local slot. `catch_unwind`
//! runs on the same thread during the same poll, so [`Fault::capture`] picks the panic-site
//! trace up. If the slot is empty (another hook replaced ours) the recovery-site trace is used.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::sync::Once;
use std::time::SystemTime;

use serde::Serialize;

thread_local! {
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Installs the backtrace-capturing panic hook (idempotent).
pub(crate) fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            prev(info);
        }));
    });
}

fn take_panic_trace() -> Option<String> {
    PANIC_TRACE.with(|slot| slot.borrow_mut().take())
}

/// Kind of execution unit a fault originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    /// Module `prep` hook.
    Prep,
    /// Module `start` hook.
    Start,
    /// Module `stop` hook.
    Stop,
    /// One-shot worker.
    Worker,
    /// Auto-restarting worker.
    ServiceWorker,
    /// Scheduled or queued task.
    Task,
    /// Admission-controlled microtask.
    MicroTask,
    /// Callback attached to another module's event.
    EventHook,
}

impl UnitKind {
    /// Returns the stable kebab-case tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Prep => "prep",
            UnitKind::Start => "start",
            UnitKind::Stop => "stop",
            UnitKind::Worker => "worker",
            UnitKind::ServiceWorker => "service-worker",
            UnitKind::Task => "task",
            UnitKind::MicroTask => "microtask",
            UnitKind::EventHook => "event-hook",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recovered panic with the identity of the unit that raised it.
#[derive(Debug, Clone, Serialize)]
pub struct Fault {
    /// Owning module.
    pub module: String,
    /// Worker/task/microtask name.
    pub name: String,
    /// Unit kind.
    pub kind: UnitKind,
    /// Panic payload rendered as text.
    pub payload: String,
    /// Captured backtrace.
    pub backtrace: String,
    /// Wall-clock time of recovery.
    pub at: SystemTime,
}

impl Fault {
    /// Builds a fault from a `catch_unwind` payload.
    pub(crate) fn capture(
        module: &str,
        name: &str,
        kind: UnitKind,
        payload: Box<dyn Any + Send>,
    ) -> Self {
        let backtrace =
            take_panic_trace().unwrap_or_else(|| Backtrace::force_capture().to_string());
        Self {
            module: module.to_string(),
            name: name.to_string(),
            kind,
            payload: payload_text(payload.as_ref()),
            backtrace,
            at: SystemTime::now(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "panic in {} {}/{}: {}",
            self.kind, self.module, self.name, self.payload
        )
    }
}

fn payload_text(any: &(dyn Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_variants() {
        let f = Fault::capture("m", "w", UnitKind::Worker, Box::new("static"));
        assert_eq!(f.payload, "static");
        let f = Fault::capture("m", "w", UnitKind::Worker, Box::new(String::from("owned")));
        assert_eq!(f.payload, "owned");
        let f = Fault::capture("m", "w", UnitKind::Worker, Box::new(42u8));
        assert_eq!(f.payload, "unknown panic");
    }

    #[test]
    fn test_display_and_tag() {
        let f = Fault::capture("net", "listener", UnitKind::ServiceWorker, Box::new("boom"));
        assert_eq!(f.to_string(), "panic in service-worker net/listener: boom");
        assert!(!f.backtrace.is_empty());
    }

    #[test]
    fn test_panic_site_trace_is_taken_once() {
        install_panic_hook();
        let payload = std::panic::catch_unwind(|| panic!("here")).unwrap_err();
        let f = Fault::capture("m", "t", UnitKind::Task, payload);
        assert_eq!(f.payload, "here");
        assert!(take_panic_trace().is_none());
    }
}
