//! Restart delay policies.
//!
//! This module groups the knobs that control **how long** a failing service worker
//! waits before it is restarted.
//!
//! ## Contents
//! - [`BackoffPolicy`] how restart delays evolve (linear step + cap + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid thundering herd
//!
//! ## Quick wiring
//! ```text
//! Config { service_backoff: BackoffPolicy, .. }
//!      └─► Module::run_worker(name, service = true, f)
//!           - backoff.next(attempt) before every restart
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → step=2s, max=5m, jitter=None.
//! - `JitterPolicy::None` by default; consider `Equal` when many workers fail together.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
