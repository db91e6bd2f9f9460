//! # Panic boundary.
//!
//! Every unit of work runs through [`recover`]: the future is polled under `catch_unwind`,
//! a panic becomes a [`Fault`] which is logged, published as `EventKind::Panicked`, offered to
//! the error reporting channel and returned as [`TaskError::Panicked`].

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::error;

use crate::core::module::Module;
use crate::core::shared::Shared;
use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::fault::{Fault, UnitKind};

/// Runs `fut` for `module`, converting a panic into [`TaskError::Panicked`].
pub(crate) async fn run_guarded<F>(
    module: &Module,
    kind: UnitKind,
    name: &str,
    fut: F,
) -> Result<(), TaskError>
where
    F: Future<Output = Result<(), TaskError>>,
{
    recover(&module.shared, module.name(), kind, name, fut).await
}

pub(crate) async fn recover<F>(
    shared: &Shared,
    module: &str,
    kind: UnitKind,
    name: &str,
    fut: F,
) -> Result<(), TaskError>
where
    F: Future<Output = Result<(), TaskError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(payload) => {
            let fault = Fault::capture(module, name, kind, payload);
            error!(
                module,
                unit = name,
                kind = kind.as_str(),
                payload = %fault.payload,
                backtrace = %fault.backtrace,
                "recovered panic"
            );
            shared.report_fault(&fault);
            shared.bus.publish(
                Event::new(EventKind::Panicked)
                    .with_module(module)
                    .with_unit(name)
                    .with_reason(fault.payload.as_str()),
            );
            Err(TaskError::Panicked(Box::new(fault)))
        }
    }
}
