//! # Admission gate.
//!
//! One atomic in-flight counter and a threshold shared by microtasks and task executions.
//! A [`Clearance`] is one unit of that counter; dropping it releases the unit and wakes the
//! admission loop.
//!
//! ## Architecture
//! ```text
//! acquire(tier) ─► try_admit (no waiters and in_flight < threshold) ─► Clearance
//!       │
//!       └─► enqueue oneshot sender in tier queue ─► wake loop ─► wait (bounded for medium/low)
//!
//! Gate::run():
//! loop {
//!   while waiters && reserve():                 (in_flight < threshold)
//!     hand out to: medium, then alternately task slot / low
//!   wait for wake (a Clearance dropped, a waiter queued, threshold changed)
//! }
//! ```
//!
//! ## Rules
//! - A waiter that timed out leaves a dead sender behind; handing a clearance to it fails,
//!   the clearance is dropped and therefore released.
//! - Medium and low waiters that hit their max wait are admitted regardless (counter may
//!   exceed the threshold).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

/// Waiter class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tier {
    Medium,
    Low,
    /// Execution slot of the task dispatcher.
    TaskSlot,
}

type Waiters = Mutex<VecDeque<oneshot::Sender<Clearance>>>;

pub(crate) struct Gate {
    in_flight: AtomicUsize,
    threshold: AtomicUsize,
    floor: usize,
    medium: Waiters,
    low: Waiters,
    task_slots: Waiters,
    prefer_tasks: AtomicBool,
    wake: Notify,
}

/// One admitted unit of work. Released on drop.
pub(crate) struct Clearance {
    gate: Arc<Gate>,
}

impl Drop for Clearance {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.gate.wake.notify_one();
    }
}

impl std::fmt::Debug for Clearance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Clearance")
    }
}

impl Gate {
    pub(crate) fn new(threshold: usize, floor: usize) -> Self {
        let floor = floor.max(1);
        Self {
            in_flight: AtomicUsize::new(0),
            threshold: AtomicUsize::new(threshold.max(floor)),
            floor,
            medium: Mutex::new(VecDeque::new()),
            low: Mutex::new(VecDeque::new()),
            task_slots: Mutex::new(VecDeque::new()),
            prefer_tasks: AtomicBool::new(true),
            wake: Notify::new(),
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn threshold(&self) -> usize {
        self.threshold.load(Ordering::Acquire)
    }

    /// Sets the threshold (raised to the floor) and returns the applied value.
    pub(crate) fn set_threshold(&self, n: usize) -> usize {
        let applied = n.max(self.floor);
        self.threshold.store(applied, Ordering::Release);
        self.wake.notify_one();
        applied
    }

    fn queue(&self, tier: Tier) -> &Waiters {
        match tier {
            Tier::Medium => &self.medium,
            Tier::Low => &self.low,
            Tier::TaskSlot => &self.task_slots,
        }
    }

    fn has_waiters(&self) -> bool {
        [Tier::Medium, Tier::Low, Tier::TaskSlot]
            .iter()
            .any(|t| !self.queue(*t).lock().unwrap_or_else(|e| e.into_inner()).is_empty())
    }

    /// Increments the counter if it is below the threshold.
    fn reserve(self: &Arc<Self>) -> Option<Clearance> {
        let threshold = self.threshold();
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < threshold).then_some(n + 1)
            })
            .ok()
            .map(|_| Clearance {
                gate: Arc::clone(self),
            })
    }

    /// Admits immediately if nobody is waiting and a slot is free.
    pub(crate) fn try_admit(self: &Arc<Self>) -> Option<Clearance> {
        if self.has_waiters() {
            return None;
        }
        self.reserve()
    }

    /// Admits unconditionally.
    pub(crate) fn admit(self: &Arc<Self>) -> Clearance {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Clearance {
            gate: Arc::clone(self),
        }
    }

    /// Waits for a clearance of the given tier; with `max_wait` the wait is bounded and
    /// the caller is admitted regardless once it elapses.
    pub(crate) async fn acquire(self: &Arc<Self>, tier: Tier, max_wait: Option<Duration>) -> Clearance {
        if let Some(c) = self.try_admit() {
            return c;
        }
        let (tx, rx) = oneshot::channel();
        self.queue(tier)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(tx);
        self.wake.notify_one();

        match max_wait {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(Ok(c)) => c,
                _ => self.admit(),
            },
            None => match rx.await {
                Ok(c) => c,
                Err(_) => self.admit(),
            },
        }
    }

    /// Hands `c` to the first live waiter in `order`. Returns `false` if there was none.
    fn hand_out(&self, mut c: Clearance, order: [Tier; 3]) -> bool {
        for tier in order {
            let mut q = self.queue(tier).lock().unwrap_or_else(|e| e.into_inner());
            while let Some(tx) = q.pop_front() {
                match tx.send(c) {
                    Ok(()) => {
                        if tier != Tier::Medium {
                            self.prefer_tasks.store(tier == Tier::Low, Ordering::Release);
                        }
                        return true;
                    }
                    Err(back) => c = back,
                }
            }
        }
        drop(c);
        false
    }

    /// Admission loop; exits once `done` is cancelled.
    pub(crate) async fn run(self: Arc<Self>, done: CancellationToken) {
        loop {
            let woken = self.wake.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();

            while self.has_waiters() {
                let Some(c) = self.reserve() else {
                    break;
                };
                let order = if self.prefer_tasks.load(Ordering::Acquire) {
                    [Tier::Medium, Tier::TaskSlot, Tier::Low]
                } else {
                    [Tier::Medium, Tier::Low, Tier::TaskSlot]
                };
                if !self.hand_out(c, order) {
                    break;
                }
            }

            tokio::select! {
                _ = &mut woken => {}
                _ = done.cancelled() => break,
            }
        }
    }
}
