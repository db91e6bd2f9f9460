//! Runtime core: registry, lifecycle orchestration and module management.
//!
//! The public API from this module is [`Runtime`] (with [`RuntimeBuilder`]) and the
//! [`Module`] handle passed to lifecycle hooks.
//!
//! Internal modules:
//! - [`shared`]: state shared by the runtime, modules and schedulers;
//! - [`module`]: module handle, status machine, single-module transitions;
//! - [`failure`]: hint/warning/error/resolve;
//! - [`registry`]: module storage and dependency graph;
//! - [`lifecycle`]: prep, start and stop passes, shutdown;
//! - [`management`]: enabled / enabled-as-dependency passes;
//! - [`export`]: status snapshot and graph dump;
//! - [`shutdown`]: termination signal handling.

mod builder;
mod export;
mod failure;
mod lifecycle;
mod management;
pub(crate) mod module;
pub(crate) mod registry;
mod runtime;
pub(crate) mod shared;
mod shutdown;

pub use builder::RuntimeBuilder;
pub use export::{ModuleReport, SchedulerSettings, Status, Totals};
pub use lifecycle::Startup;
pub use module::{FailureStatus, Module, ModuleSpec, ModuleStatus};
pub use runtime::Runtime;
