//! Error types used by the modvisor runtime and by module code.
//!
//! This module defines two main error enums:
//!
//! - [`RuntimeError`]: errors raised by the orchestration runtime itself
//!   (configuration, startup and shutdown failures).
//! - [`TaskError`]: errors returned by module hooks, workers, tasks and microtasks.
//!
//! Both types provide `as_label` for logs/metrics.

use thiserror::Error;

use crate::fault::Fault;

/// # Errors produced by the module runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A module declares a dependency that was never registered.
    #[error("module {module:?} depends on unknown module {dependency:?}")]
    UnknownDependency {
        /// Module declaring the dependency.
        module: String,
        /// Name that did not resolve.
        dependency: String,
    },

    /// The dependency graph contains a cycle; listed modules can never become ready.
    #[error("dependency cycle detected; stuck modules: {modules:?}")]
    DependencyCycle {
        /// Modules that could not make progress.
        modules: Vec<String>,
    },

    /// The global prep function failed.
    #[error("global prep failed: {source}")]
    GlobalPrep {
        /// Underlying error.
        source: TaskError,
    },

    /// A module's `prep` hook failed.
    #[error("failed to prep module {module:?}: {source}")]
    Prep {
        /// Module name.
        module: String,
        /// Underlying error.
        source: TaskError,
    },

    /// A module's `start` hook failed.
    #[error("failed to start module {module:?}: {source}")]
    Start {
        /// Module name.
        module: String,
        /// Underlying error.
        source: TaskError,
    },

    /// A module's `stop` hook failed (first error of a stop pass).
    #[error("failed to stop module {module:?}: {source}")]
    Stop {
        /// Module name.
        module: String,
        /// Underlying error.
        source: TaskError,
    },

    /// Lookup of a module by name failed.
    #[error("unknown module {0:?}")]
    UnknownModule(String),

    /// Lookup of an event on a module failed.
    #[error("module {module:?} has no event {event:?}")]
    UnknownEvent {
        /// Module that was expected to own the event.
        module: String,
        /// Event name.
        event: String,
    },

    /// `Runtime::start` was called more than once.
    #[error("runtime already started")]
    AlreadyStarted,

    /// Startup was interrupted because shutdown began.
    #[error("runtime is shutting down")]
    ShuttingDown,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use modvisor::RuntimeError;
    ///
    /// let err = RuntimeError::DependencyCycle { modules: vec!["a".into()] };
    /// assert_eq!(err.as_label(), "runtime_dependency_cycle");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::UnknownDependency { .. } => "runtime_unknown_dependency",
            RuntimeError::DependencyCycle { .. } => "runtime_dependency_cycle",
            RuntimeError::GlobalPrep { .. } => "runtime_global_prep_failed",
            RuntimeError::Prep { .. } => "runtime_prep_failed",
            RuntimeError::Start { .. } => "runtime_start_failed",
            RuntimeError::Stop { .. } => "runtime_stop_failed",
            RuntimeError::UnknownModule(_) => "runtime_unknown_module",
            RuntimeError::UnknownEvent { .. } => "runtime_unknown_event",
            RuntimeError::AlreadyStarted => "runtime_already_started",
            RuntimeError::ShuttingDown => "runtime_shutting_down",
        }
    }

    /// Returns true for misconfiguration of the module graph.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RuntimeError::UnknownDependency { .. } | RuntimeError::DependencyCycle { .. }
        )
    }
}

/// # Errors produced by module code.
///
/// Returned by module hooks (`prep`/`start`/`stop`), workers, tasks and microtasks.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// Execution failed.
    #[error("execution failed: {reason}")]
    Fail {
        /// The underlying error message.
        reason: String,
    },

    /// Execution observed its cancellation token and gave up.
    #[error("context cancelled")]
    Canceled,

    /// Returned from a `prep` hook to request an orderly exit that is not a failure
    /// (for example after printing a version or help text).
    #[error("clean exit requested")]
    CleanExit,

    /// Execution panicked; the panic was recovered.
    #[error("{0}")]
    Panicked(Box<Fault>),
}

impl TaskError {
    /// Convenience constructor for [`TaskError::Fail`].
    pub fn fail(reason: impl Into<String>) -> Self {
        TaskError::Fail {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use modvisor::TaskError;
    ///
    /// assert_eq!(TaskError::fail("boom").as_label(), "task_failed");
    /// assert_eq!(TaskError::CleanExit.as_label(), "task_clean_exit");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
            TaskError::CleanExit => "task_clean_exit",
            TaskError::Panicked(_) => "task_panicked",
        }
    }

    /// Returns the recovered panic, if this error carries one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            TaskError::Panicked(f) => Some(f),
            _ => None,
        }
    }
}
