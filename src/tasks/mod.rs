//! # Task scheduler.
//!
//! Deferred, queued, prioritized and time-scheduled units of work bound to a module.
//!
//! - [`Task`] handle returned by [`Module::new_task`](crate::Module::new_task)
//! - `TaskQueues` plain queue, prioritized queue and schedule list (each behind its own lock)
//! - `dispatch` queue dispatcher, schedule dispatcher and the execution protocol
//!
//! ## Architecture
//! ```text
//! queue()/prioritize()/start_asap() ──► plain | prioritized ──filled──► queue dispatcher
//!        │                                                                ├─► gate slot (TaskSlot)
//!        └─► max-delay deadline ─┐                                        ├─► pop prioritized, else plain
//! schedule(at)/repeat() ─────────┴─► schedule list ──recompute──► schedule dispatcher
//!                                                                   ├─► due & queued → force-run
//!                                                                   └─► due          → front of prioritized
//! ```
//!
//! ## Rules
//! - A task is in at most one of {plain, prioritized}; schedule membership is independent.
//! - Lock order: task state, then a list. A list lock is never held while locking a task.
//! - Within a tier strictly FIFO; prioritized always drains before plain.

mod dispatch;
mod queue;
mod task;

pub(crate) use dispatch::spawn_dispatchers;
pub(crate) use queue::TaskQueues;
pub use task::Task;
