//! Single-use workflow runs executed on a dedicated worker thread.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use jobline_types::{Outcome, StepResult, WorkflowDefinition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    error::EngineError,
    executor::{self, RunReport, StepRunner},
};

/// Lifecycle of a [`WorkflowRun`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Created,
    Running,
    Finished,
}

/// A live execution bound to one definition snapshot.
///
/// A run is started at most once and cannot be reused; create a new one per request.
pub struct WorkflowRun {
    definition: Arc<WorkflowDefinition>,
    runner: Arc<dyn StepRunner>,
    cancellation: CancellationToken,
    status: RunStatus,
    worker: Option<JoinHandle<RunReport>>,
    report: Option<RunReport>,
}

impl WorkflowRun {
    pub fn new(definition: WorkflowDefinition, runner: Arc<dyn StepRunner>) -> Self {
        Self {
            definition: Arc::new(definition),
            runner,
            cancellation: CancellationToken::new(),
            status: RunStatus::Created,
            worker: None,
            report: None,
        }
    }

    /// Observe `cancellation` between steps instead of a private token.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Spawn the worker thread that executes every step.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.status != RunStatus::Created {
            return Err(EngineError::RunAlreadyStarted {
                workflow: self.definition.workflow.clone(),
            });
        }

        let definition = Arc::clone(&self.definition);
        let runner = Arc::clone(&self.runner);
        let cancellation = self.cancellation.clone();
        let worker = thread::Builder::new()
            .name(format!("jobline-{}", self.definition.workflow))
            .spawn(move || executor::execute_workflow(&definition, runner.as_ref(), &cancellation))
            .map_err(|source| EngineError::Spawn {
                workflow: self.definition.workflow.clone(),
                source,
            })?;

        debug!(workflow = %self.definition.workflow, "workflow run started");
        self.worker = Some(worker);
        self.status = RunStatus::Running;
        Ok(())
    }

    /// Block until the worker finishes and return its report.
    ///
    /// Calling this again after completion returns the same report.
    pub fn wait_until_finished(&mut self) -> Result<&RunReport, EngineError> {
        match self.status {
            RunStatus::Created => Err(EngineError::RunNotStarted {
                workflow: self.definition.workflow.clone(),
            }),
            RunStatus::Finished => self.report.as_ref().ok_or_else(|| EngineError::WorkerPanicked {
                workflow: self.definition.workflow.clone(),
            }),
            RunStatus::Running => {
                let joined = self.worker.take().map(JoinHandle::join);
                self.status = RunStatus::Finished;
                match joined {
                    Some(Ok(report)) => {
                        debug!(
                            workflow = %self.definition.workflow,
                            steps = report.results.len(),
                            success = report.aggregate.success,
                            "workflow run finished"
                        );
                        let report: &RunReport = self.report.insert(report);
                        Ok(report)
                    }
                    _ => {
                        error!(workflow = %self.definition.workflow, "workflow worker panicked");
                        Err(EngineError::WorkerPanicked {
                            workflow: self.definition.workflow.clone(),
                        })
                    }
                }
            }
        }
    }

    /// Report of a finished run.
    pub fn report(&self) -> Option<&RunReport> {
        self.report.as_ref()
    }

    /// Step results in emission order; empty until the run finished.
    pub fn step_results(&self) -> &[StepResult] {
        self.report.as_ref().map(|report| report.results.as_slice()).unwrap_or_default()
    }

    pub fn aggregate(&self) -> Option<&Outcome> {
        self.report.as_ref().map(|report| &report.aggregate)
    }
}
