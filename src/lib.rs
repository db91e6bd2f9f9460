//! # modvisor
//!
//! **Modvisor** is an in-process runtime that starts, runs and stops a set of cooperating
//! service modules in dependency order, and schedules the work those modules perform.
//!
//! Every module declares its dependencies and three lifecycle hooks (`prep`, `start`,
//! `stop`). The runtime starts a module only after all of its dependencies are online, stops
//! it only after all of its dependents are offline, and gives every unit of work (worker,
//! task, microtask) one execution, panic-recovery and backpressure model.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  ModuleSpec  │   │  ModuleSpec  │   │  ModuleSpec  │
//!     │  "database"  │   │    "cache"   │   │ "api" (deps) │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Runtime                                                          │
//! │  - Registry (modules + dependency graph)                          │
//! │  - Lifecycle passes (prep → start → stop, fixed point)            │
//! │  - Module management (enabled / enabled-as-dependency)            │
//! │  - Status export, exit code                                       │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!   ┌──────────┐     ┌──────────────┐    ┌──────────────┐      │
//!   │ Workers  │     │    Tasks     │    │  MicroTasks  │      │
//!   │ (service │     │ queue/prio/  │    │ high/medium/ │      │
//!   │ restart) │     │ schedule     │    │ low tiers    │      │
//!   └────┬─────┘     └──────┬───────┘    └──────┬───────┘      │
//!        │                  └────── Gate ───────┘              │
//!        │           (shared in-flight counter and threshold)  │
//!        ▼                                                     ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                           subscriber listener
//!                                   ▼
//!                             SubscriberSet
//!                        ┌──────────┼──────────┐
//!                        ▼          ▼          ▼
//!                     sub1.on    sub2.on    subN.on
//!                     _event()   _event()   _event()
//! ```
//!
//! ### Module lifecycle
//! ```text
//! Dead ─► Preparing ─► Offline ─► Starting ─► Online ─► Stopping ─► Offline
//! ```
//!
//! ## Features
//! | Area              | Description                                                | Key types                              |
//! |-------------------|------------------------------------------------------------|----------------------------------------|
//! | **Lifecycle**     | Dependency-ordered prep/start/stop, module management       | [`Runtime`], [`Module`], [`ModuleSpec`]|
//! | **Workers**       | Panic-safe long-running functions, service restart          | [`Module::run_worker`]                 |
//! | **Tasks**         | Queued, prioritized, scheduled, repeating work              | [`Task`]                               |
//! | **MicroTasks**    | Tiered admission under a global concurrency cap             | [`Module::start_microtask`]            |
//! | **Event hooks**   | Cross-module callbacks deferred until the owner is online   | [`Module::register_event_hook`]        |
//! | **Observability** | Events, subscribers, status snapshot, fault reporting       | [`Subscribe`], [`Status`], [`Fault`]   |
//! | **Errors**        | Typed errors for orchestration and module code              | [`RuntimeError`], [`TaskError`]        |
//! | **Configuration** | Serde-loadable runtime settings                             | [`Config`]                             |
//!
//! ## Optional features
//! - `logging`: exports [`LogWriter`], a subscriber rendering events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use modvisor::{Config, ModuleSpec, Runtime, Startup, TaskError};
//!
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rt = Runtime::new(Config::default());
//!
//!     rt.register("store", ModuleSpec::new());
//!     rt.register(
//!         "ticker",
//!         ModuleSpec::new()
//!             .depends_on(["store"])
//!             .start(|m| async move {
//!                 m.new_task("tick", |_ctx| async { Ok::<_, TaskError>(()) })
//!                     .repeat(Duration::from_secs(1));
//!                 Ok(())
//!             }),
//!     );
//!
//!     assert_eq!(rt.start().await?, Startup::Online);
//!     rt.shutdown().await?;
//!     assert_eq!(rt.exit_status_code().await, 0);
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod fault;
mod hooks;
mod microtasks;
mod policies;
mod subscribers;
mod tasks;
mod workers;

// ---- Public re-exports ----

pub use config::Config;
pub use self::core::{
    FailureStatus, Module, ModuleReport, ModuleSpec, ModuleStatus, Runtime, RuntimeBuilder,
    SchedulerSettings, Startup, Status, Totals,
};
pub use error::{RuntimeError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use fault::{Fault, UnitKind};
pub use hooks::EventData;
pub use policies::{BackoffPolicy, JitterPolicy};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::Task;

// Optional: built-in tracing subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
