//! Request/response wrapper around a loaded workflow definition.
//!
//! A [`JobElement`] owns one definition and answers [`RunRequest`]s against it: refresh context
//! parameters, overlay the request's parameters, run every step on a worker thread, pick the
//! result the caller asked for, and remove the overlay again. The definition is guarded by a
//! mutex, so requests against the same element are serialized while different elements run
//! independently.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use jobline_types::{ExecutionKind, ResolvedResult, RunRequest, WorkflowDefinition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    error::{EngineError, LoadError},
    executor::{BuiltinRunner, StepRunner},
    loader::DefinitionLoader,
    parameters::{self, ContextParameters, ParameterOverlay, StaticContextParameters},
    policy::{OutputNamePolicy, PrefixOutputPolicy},
    resolve::{self, DEFAULT_OUTPUT_STEP_NAME},
    run::WorkflowRun,
};

/// A named, reusable job answering run requests.
pub struct JobElement {
    name: String,
    location: Option<String>,
    definition: Mutex<WorkflowDefinition>,
    policy: Arc<dyn OutputNamePolicy>,
    runner: Arc<dyn StepRunner>,
    context: Arc<dyn ContextParameters>,
    default_output: String,
}

impl JobElement {
    /// Wraps an already loaded definition using the bundled runner and the `OUTPUT` prefix policy.
    pub fn new(name: impl Into<String>, definition: WorkflowDefinition) -> Self {
        Self {
            name: name.into(),
            location: None,
            definition: Mutex::new(definition),
            policy: Arc::new(PrefixOutputPolicy::default()),
            runner: Arc::new(BuiltinRunner),
            context: Arc::new(StaticContextParameters::default()),
            default_output: DEFAULT_OUTPUT_STEP_NAME.to_string(),
        }
    }

    /// Loads the definition at `location` and wraps it.
    pub fn load(name: impl Into<String>, location: &str, loader: &dyn DefinitionLoader) -> Result<Self, LoadError> {
        let definition = loader.load(location)?;
        let mut element = Self::new(name, definition);
        element.location = Some(location.to_string());
        Ok(element)
    }

    pub fn with_policy(mut self, policy: Arc<dyn OutputNamePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_context_parameters(mut self, context: Arc<dyn ContextParameters>) -> Self {
        self.context = context;
        self
    }

    /// Step name used when a request does not name one. Blank names keep the current default.
    pub fn with_default_output(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.default_output = name;
        }
        self
    }

    /// Applies the output policy, context parameters and default output from `config`.
    pub fn with_config(self, config: &EngineConfig) -> Self {
        self.with_policy(Arc::new(config.output_policy()))
            .with_context_parameters(config.context_parameters())
            .with_default_output(config.default_output_step.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location the definition was loaded from, if any.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn default_output(&self) -> &str {
        &self.default_output
    }

    pub fn execution_kind(&self) -> ExecutionKind {
        ExecutionKind::Job
    }

    /// Step names callers may request, in declaration order.
    pub fn list_valid_output_names(&self) -> Vec<String> {
        resolve::list_valid_output_names(&self.lock_definition(), self.policy.as_ref())
    }

    /// Names of the parameters the definition currently declares.
    pub fn declared_parameters(&self) -> Vec<String> {
        self.lock_definition().parameter_names()
    }

    /// A copy of the definition as it stands between requests.
    pub fn definition_snapshot(&self) -> WorkflowDefinition {
        self.lock_definition().clone()
    }

    /// Runs the job to completion and returns the result the request asked for.
    ///
    /// Step failures are reported through the outcome's success flag, not as errors.
    pub fn process_request(&self, request: &RunRequest) -> Result<ResolvedResult, EngineError> {
        self.process_request_with_cancellation(request, CancellationToken::new())
    }

    /// Like [`process_request`](Self::process_request), stopping at the next step boundary once
    /// `cancellation` fires. A cancelled run answers with its failed aggregate.
    pub fn process_request_with_cancellation(
        &self,
        request: &RunRequest,
        cancellation: CancellationToken,
    ) -> Result<ResolvedResult, EngineError> {
        let started = Instant::now();
        let mut definition = self.lock_definition();
        info!(element = %self.name, workflow = %definition.workflow, "starting job");

        parameters::update_parameters(&mut definition, self.context.as_ref());
        let overlay = ParameterOverlay::apply(&mut definition, request.parameters.as_ref());

        let mut run = WorkflowRun::new((*overlay).clone(), Arc::clone(&self.runner)).with_cancellation(cancellation);
        run.start()?;
        let report = run.wait_until_finished()?;
        let resolved = resolve::resolve_result(
            &overlay,
            report,
            request.output_step_name.as_deref(),
            &self.default_output,
            self.policy.as_ref(),
            self.execution_kind(),
        );
        drop(overlay);

        info!(
            element = %self.name,
            success = resolved.outcome.success,
            step = resolved.step.as_deref().unwrap_or("<aggregate>"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished job"
        );
        Ok(resolved)
    }

    /// Runs the request on the blocking pool with an optional deadline.
    ///
    /// When the deadline elapses the run is cancelled at its next step boundary (which still
    /// clears the injected parameters) and [`EngineError::DeadlineExceeded`] is returned.
    /// Cancelling `cancellation` stops the run the same way but answers with the failed aggregate.
    pub async fn process_request_async(
        self: Arc<Self>,
        request: RunRequest,
        cancellation: CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<ResolvedResult, EngineError> {
        let run_token = cancellation.child_token();
        let worker_token = run_token.clone();
        let task = tokio::task::spawn_blocking(move || self.process_request_with_cancellation(&request, worker_token));

        let Some(limit) = deadline else {
            return task.await?;
        };
        match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined?,
            Err(_) => {
                run_token.cancel();
                warn!(limit_ms = limit.as_millis() as u64, "job did not finish before its deadline");
                Err(EngineError::DeadlineExceeded { limit })
            }
        }
    }

    /// Reloads this element's definition from its location and runs it without answering anyone.
    pub fn fire_and_forget(&self, loader: &dyn DefinitionLoader) {
        let Some(location) = self.location() else {
            warn!(element = %self.name, "element has no location to reload from");
            return;
        };
        execute_fire_and_forget(location, loader, Arc::clone(&self.runner), self.context.as_ref());
    }

    fn lock_definition(&self) -> MutexGuard<'_, WorkflowDefinition> {
        self.definition.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Loads a fresh definition, runs it to completion, and discards the result.
///
/// Every failure (including a panicking worker) is logged at `warn` and swallowed.
pub fn execute_fire_and_forget(
    location: &str,
    loader: &dyn DefinitionLoader,
    runner: Arc<dyn StepRunner>,
    context: &dyn ContextParameters,
) {
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| -> Result<bool, EngineError> {
        let mut definition = loader.load(location)?;
        parameters::add_base_parameters(&mut definition, context);
        parameters::update_parameters(&mut definition, context);

        let mut run = WorkflowRun::new(definition, runner);
        run.start()?;
        Ok(run.wait_until_finished()?.aggregate.success)
    }));

    match attempt {
        Ok(Ok(success)) => debug!(location, success, "fire-and-forget run finished"),
        Ok(Err(error)) => warn!(location, error = %error, "fire-and-forget run failed"),
        Err(_) => warn!(location, "fire-and-forget run panicked"),
    }
}
