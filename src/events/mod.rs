//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to publish
//! observability events emitted by the orchestrator, the worker runtime and the
//! schedulers. It is the hook an embedding application uses to attach its own
//! logging or metrics backend (see [`Subscribe`](crate::Subscribe)).
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: module lifecycle transitions, failure status changes, workers
//!   (failures, restarts), tasks (failures), panic recovery, shutdown, subscriber workers.
//! - **Consumers**: the runtime listener that fans events out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
