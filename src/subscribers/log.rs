//! # LogWriter: tracing-backed event renderer
//!
//! A minimal subscriber that renders incoming [`Event`]s through `tracing`.
//! Lifecycle transitions log at `info`, failures at `warn`, panics at `error`.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let module = e.module.as_deref().unwrap_or("-");
        let unit = e.unit.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ModulePreparing => debug!(module, "[preparing]"),
            EventKind::ModuleStarting => info!(module, "[starting]"),
            EventKind::ModuleOnline => info!(module, "[online]"),
            EventKind::ModuleStopping => info!(module, "[stopping]"),
            EventKind::ModuleOffline => info!(module, "[offline]"),
            EventKind::ModuleFailed => warn!(module, hook = unit, reason, "[module-failed]"),
            EventKind::FailureRaised => warn!(module, id = unit, title = reason, "[failure]"),
            EventKind::FailureResolved => info!(module, id = unit, "[resolved]"),
            EventKind::WorkerFailed => {
                warn!(module, worker = unit, reason, attempt = e.attempt, "[worker-failed]")
            }
            EventKind::WorkerRestarting => info!(
                module,
                worker = unit,
                attempt = e.attempt,
                delay_ms = e.delay_ms,
                "[restarting]"
            ),
            EventKind::TaskFailed => warn!(module, task = unit, reason, "[task-failed]"),
            EventKind::Panicked => error!(module, unit, reason, "[panicked]"),
            EventKind::ShutdownRequested => info!("[shutdown-requested]"),
            EventKind::ShutdownComplete => info!("[shutdown-complete]"),
            EventKind::SubscriberOverflow => warn!(subscriber = unit, reason, "[subscriber-overflow]"),
            EventKind::SubscriberPanicked => {
                error!(subscriber = unit, reason, "[subscriber-panicked]")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
