//! MicroTasks: short, resource-heavy work admitted under a global concurrency cap.
//!
//! ## Contents
//! - [`Gate`] shared in-flight counter, waiter queues and the admission loop
//! - `microtask` [`Module::start_microtask`](crate::Module::start_microtask) and its
//!   medium/low priority variants
//!
//! ## Tiers
//! | tier   | admission                                   | max wait                     |
//! |--------|---------------------------------------------|------------------------------|
//! | high   | immediate, unconditional                    | none                         |
//! | medium | immediate if free, else first clearance     | `medium_priority_max_wait`   |
//! | low    | immediate if free, else after medium/tasks  | `low_priority_max_wait`      |
//!
//! Task executions draw their slots from the same gate.

mod gate;
mod microtask;

pub(crate) use gate::{Clearance, Gate, Tier};
