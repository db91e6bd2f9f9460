use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::config::Config;
use crate::core::runtime::Runtime;
use crate::core::shared::Shared;
use crate::events::Bus;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for constructing a [`Runtime`] with optional subscribers.
pub struct RuntimeBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl RuntimeBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (module transitions, failures, panics, restarts)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the runtime and spawns its background loops:
    /// - subscriber listener (Bus → SubscriberSet)
    /// - microtask admission loop
    /// - task queue and schedule dispatchers
    ///
    /// # Panics
    /// Panics if called outside of a tokio runtime.
    pub fn build(self) -> Arc<Runtime> {
        let handle = Handle::current();
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let shared = Arc::new(Shared::new(self.cfg, bus.clone(), handle));

        let subs = SubscriberSet::new(self.subscribers, bus);
        spawn_subscriber_listener(&shared, subs);

        let gate = Arc::clone(&shared.gate);
        shared.handle.spawn(gate.run(shared.shutdown_done.clone()));
        crate::tasks::spawn_dispatchers(&shared);

        Arc::new(Runtime::new_internal(shared))
    }
}

/// Forwards bus events to the subscriber set until shutdown completes.
fn spawn_subscriber_listener(shared: &Arc<Shared>, subs: SubscriberSet) {
    if subs.is_empty() {
        return;
    }
    let mut rx = shared.bus.subscribe();
    let done = shared.shutdown_done.clone();
    shared.handle.spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => subs.emit(ev),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                _ = done.cancelled() => {
                    loop {
                        match rx.try_recv() {
                            Ok(ev) => subs.emit(ev),
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    break;
                }
            }
        }
        subs.shutdown().await;
    });
}
