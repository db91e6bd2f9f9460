//! # Runtime events emitted by the orchestrator, workers and schedulers.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Module events**: lifecycle transitions and failure status changes
//! - **Work events**: worker/task failures, service restarts, recovered panics
//! - **Shutdown events**: global shutdown requested/completed
//! - **Subscriber events**: overflow and panics inside subscribers
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use modvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::WorkerRestarting)
//!     .with_module("net")
//!     .with_unit("listener")
//!     .with_reason("bind failed")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_secs(4));
//!
//! assert_eq!(ev.unit.as_deref(), Some("listener"));
//! assert_eq!(ev.delay_ms, Some(4000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Module lifecycle ===
    /// Module `prep` hook is running. Sets `module`.
    ModulePreparing,
    /// Module `start` hook is running. Sets `module`.
    ModuleStarting,
    /// Module finished starting. Sets `module`.
    ModuleOnline,
    /// Module stop began (its context is cancelled). Sets `module`.
    ModuleStopping,
    /// Module finished stopping. Sets `module`.
    ModuleOffline,
    /// A module hook returned an error. Sets `module`, `unit` (hook), `reason`.
    ModuleFailed,

    // === Failure status ===
    /// Failure status raised. Sets `module`, `unit` (failure id), `reason` (title).
    FailureRaised,
    /// Failure status cleared. Sets `module`, `unit` (failure id).
    FailureResolved,

    // === Work ===
    /// A worker returned an error. Sets `module`, `unit`, `reason`, `attempt`.
    WorkerFailed,
    /// A service worker restart was scheduled. Sets `module`, `unit`, `attempt`, `delay_ms`.
    WorkerRestarting,
    /// A task returned an error. Sets `module`, `unit`, `reason`.
    TaskFailed,
    /// A panic was recovered. Sets `module`, `unit`, `reason` (payload).
    Panicked,

    // === Shutdown ===
    /// Global shutdown began.
    ShutdownRequested,
    /// All modules stopped.
    ShutdownComplete,

    // === Subscribers ===
    /// Subscriber dropped an event (queue full or worker closed). Sets `unit`, `reason`.
    SubscriberOverflow,
    /// Subscriber panicked during event processing. Sets `unit`, `reason`.
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Module the event refers to.
    pub module: Option<Arc<str>>,
    /// Worker/task/hook/subscriber name.
    pub unit: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Delay before next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            module: None,
            unit: None,
            reason: None,
            attempt: None,
            delay_ms: None,
        }
    }

    /// Attaches a module name.
    #[inline]
    pub fn with_module(mut self, module: impl Into<Arc<str>>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Attaches a unit name.
    #[inline]
    pub fn with_unit(mut self, unit: impl Into<Arc<str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_unit(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_unit(subscriber)
            .with_reason(info)
    }
}
