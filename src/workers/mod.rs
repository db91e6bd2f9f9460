//! Workers: long-running functions of a module with panic recovery and optional restart.
//!
//! ## Contents
//! - [`guard`](self::guard) panic boundary shared by every unit of work
//! - `worker` [`Module::run_worker`](crate::Module::run_worker) / `start_worker`

mod guard;
mod worker;

pub(crate) use guard::{recover, run_guarded};
