//! Error types surfaced by the engine.
//!
//! Only definition loading is fatal to a request. Step failures never show up here; they are
//! carried by the [`Outcome`](jobline_types::Outcome) success flag instead.

use std::time::Duration;

use thiserror::Error;

/// Failure to locate or parse a workflow definition.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The caller supplied a blank location.
    #[error("workflow location is empty")]
    EmptyLocation,
    /// The definition could not be read.
    #[error("failed to read workflow definition '{location}': {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
    /// The definition is not valid YAML/JSON for the workflow schema.
    #[error("failed to parse workflow definition '{location}': {message}")]
    Parse { location: String, message: String },
    /// The definition parsed but is structurally unusable.
    #[error("invalid workflow definition '{location}': {reason}")]
    Invalid { location: String, reason: String },
}

/// Errors raised by the run lifecycle and the request entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] LoadError),
    /// A [`WorkflowRun`](crate::WorkflowRun) was started twice.
    #[error("workflow run '{workflow}' has already been started")]
    RunAlreadyStarted { workflow: String },
    /// Waiting was requested on a run that was never started.
    #[error("workflow run '{workflow}' has not been started")]
    RunNotStarted { workflow: String },
    /// The dedicated worker thread could not be spawned.
    #[error("failed to spawn worker for workflow '{workflow}': {source}")]
    Spawn {
        workflow: String,
        #[source]
        source: std::io::Error,
    },
    /// The worker thread panicked outside step execution before finishing the run.
    #[error("worker for workflow '{workflow}' panicked")]
    WorkerPanicked { workflow: String },
    /// The caller's deadline elapsed before the run finished.
    #[error("workflow run did not finish within {limit:?}")]
    DeadlineExceeded { limit: Duration },
    /// The blocking task hosting the run could not be joined.
    #[error("workflow task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
