//! # Event hooks between modules.
//!
//! A module declares named events with [`Module::register_event`]; other modules attach
//! callbacks with [`Module::register_event_hook`]. [`Module::trigger_event`] fans out to every
//! hook asynchronously, each as a worker of the module that owns the hook.
//!
//! ## Delivery
//! ```text
//! trigger_event(event, data)
//!   └─► for hook in hooks[event]
//!         ├─► owner stopping, or runtime shutting down → skip
//!         └─► spawn: wait until owner Online (or shutdown → abandon)
//!                    └─► owner.run_worker_as(description, EventHook, f(ctx, data))
//! ```
//!
//! Hooks registered during startup therefore never fire before their owner has started.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::module::{Module, ModuleStatus};
use crate::error::{RuntimeError, TaskError};
use crate::fault::UnitKind;

/// Payload passed to event hooks.
pub type EventData = Arc<dyn Any + Send + Sync>;

type HookCallback =
    Arc<dyn Fn(CancellationToken, EventData) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// A callback attached to another module's event, owned by the registering module.
#[derive(Clone)]
pub(crate) struct EventHook {
    owner: Weak<Module>,
    description: String,
    f: HookCallback,
}

impl Module {
    /// Declares an event on this module (no-op if it exists).
    pub fn register_event(&self, event: &str) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.to_string())
            .or_default();
    }

    /// Attaches `f` to `event` of module `target`. The hook runs as a worker of `self`.
    ///
    /// Fails with [`RuntimeError::UnknownModule`] or [`RuntimeError::UnknownEvent`].
    pub fn register_event_hook<F, Fut>(
        self: &Arc<Self>,
        target: &str,
        event: &str,
        description: &str,
        f: F,
    ) -> Result<(), RuntimeError>
    where
        F: Fn(CancellationToken, EventData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let target_module = self
            .registry
            .upgrade()
            .and_then(|r| r.get(target))
            .ok_or_else(|| RuntimeError::UnknownModule(target.to_string()))?;

        let hook = EventHook {
            owner: Arc::downgrade(self),
            description: description.to_string(),
            f: Arc::new(move |ctx, data| f(ctx, data).boxed()),
        };
        let mut events = target_module
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let hooks = events
            .get_mut(event)
            .ok_or_else(|| RuntimeError::UnknownEvent {
                module: target.to_string(),
                event: event.to_string(),
            })?;
        hooks.push(hook);
        debug!(module = %self.name, target, event, description, "event hook registered");
        Ok(())
    }

    /// Delivers `data` to every hook of `event`. Returns immediately.
    pub fn trigger_event(&self, event: &str, data: EventData) {
        let hooks = {
            let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            match events.get(event) {
                Some(hooks) => hooks.clone(),
                None => {
                    warn!(module = %self.name, event, "trigger of undeclared event");
                    return;
                }
            }
        };

        for hook in hooks {
            let Some(owner) = hook.owner.upgrade() else {
                continue;
            };
            if owner.status() == ModuleStatus::Stopping || self.shared.is_shutting_down() {
                continue;
            }
            let data = Arc::clone(&data);
            let shutdown = self.shared.shutdown.clone();
            self.shared.handle.spawn(async move {
                let mut status = owner.watch_status();
                let online = status
                    .wait_for(|s| *s == ModuleStatus::Online)
                    .map(|res| res.is_ok());
                tokio::select! {
                    ok = online => {
                        if !ok {
                            return;
                        }
                    }
                    _ = shutdown.cancelled() => return,
                }
                if shutdown.is_cancelled() {
                    return;
                }
                drop(status);
                let f = Arc::clone(&hook.f);
                let _ = owner
                    .run_worker_as(&hook.description, UnitKind::EventHook, false, |ctx| {
                        f(ctx, Arc::clone(&data))
                    })
                    .await;
            });
        }
    }
}
