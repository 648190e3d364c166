//! Execution engine: builds a plan from a workflow definition, runs its steps in dependency
//! order, and folds the emitted step results into the run's aggregate outcome.
//!
//! - Plan preparation substitutes `${NAME}` parameter references into step configuration
//! - `runner::StepRunner` abstracts how a single step action is executed
//! - Steps run sequentially; outputs are recorded in `RunContext.steps` as they go
//! - A step whose dependency failed (or was itself skipped) does not run and emits no result

use std::{
    collections::{HashMap, HashSet, VecDeque},
    panic::{self, AssertUnwindSafe},
    time::Instant,
};

use anyhow::{Result, bail};
use indexmap::IndexMap;
use jobline_types::{Outcome, StepResult, StepStatus, WorkflowDefinition, WorkflowStepDefinition};
use jobline_util::substitute_value;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod runner;
pub use runner::{BuiltinRunner, NoopRunner, StepRunner};

/// Read-only state available to a step while it runs.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Identifier of the workflow being run.
    pub workflow: String,
    /// Effective parameter values for this run.
    pub parameters: IndexMap<String, String>,
    /// Outputs of steps that already ran, keyed by step name.
    pub steps: HashMap<String, Value>,
}

impl RunContext {
    /// Captures the identifier and effective parameters of `definition`.
    pub fn for_definition(definition: &WorkflowDefinition) -> Self {
        Self {
            workflow: definition.workflow.clone(),
            parameters: definition.effective_parameters(),
            steps: HashMap::new(),
        }
    }
}

/// Step with its configuration interpolated against the run's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStep {
    pub name: String,
    /// Action identifier handed to the [`StepRunner`].
    pub run: String,
    pub depends_on: Vec<String>,
    pub with: IndexMap<String, Value>,
}

/// An ordered list of prepared steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub steps: Vec<PreparedStep>,
}

/// Prepare a plan by ordering steps by their dependencies and substituting parameters.
///
/// Steps without dependency constraints keep their declaration order.
pub fn prepare_plan(definition: &WorkflowDefinition, run_context: &RunContext) -> Result<Plan> {
    let ordered_steps = order_steps_for_execution(&definition.steps)?;

    let steps = ordered_steps
        .into_iter()
        .map(|step| PreparedStep {
            name: step.name.clone(),
            run: step.run.clone(),
            depends_on: step.depends_on.clone(),
            with: step
                .with
                .iter()
                .map(|(key, value)| (key.clone(), substitute_value(value, &run_context.parameters)))
                .collect(),
        })
        .collect();

    Ok(Plan { steps })
}

fn order_steps_for_execution(steps: &[WorkflowStepDefinition]) -> Result<Vec<&WorkflowStepDefinition>> {
    let mut lookup: IndexMap<&str, &WorkflowStepDefinition> = IndexMap::new();
    for step in steps {
        if lookup.insert(step.name.as_str(), step).is_some() {
            bail!("duplicate step name detected: '{}'", step.name);
        }
    }

    let mut in_degrees: HashMap<&str, usize> = lookup.keys().map(|name| (*name, 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for (step_name, step) in &lookup {
        let mut seen = HashSet::new();
        for dependency in &step.depends_on {
            if !lookup.contains_key(dependency.as_str()) {
                bail!("step '{}' depends on unknown step '{}'", step_name, dependency);
            }
            if dependency == step_name {
                bail!("step '{}' cannot depend on itself", step_name);
            }
            if !seen.insert(dependency.as_str()) {
                continue;
            }
            if let Some(degree) = in_degrees.get_mut(step_name) {
                *degree += 1;
            }
            adjacency.entry(dependency.as_str()).or_default().push(*step_name);
        }
    }

    let mut queue: VecDeque<&str> = lookup
        .keys()
        .filter(|name| in_degrees.get(*name).copied().unwrap_or(0) == 0)
        .copied()
        .collect();

    let mut ordered = Vec::with_capacity(lookup.len());
    while let Some(step_name) = queue.pop_front() {
        ordered.push(step_name);

        if let Some(children) = adjacency.get(step_name) {
            for child in children {
                if let Some(degree) = in_degrees.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
    }

    if ordered.len() != lookup.len() {
        let mut remaining: Vec<&str> = in_degrees.into_iter().filter(|(_, degree)| *degree > 0).map(|(name, _)| name).collect();
        remaining.sort_unstable();
        bail!("cycle detected in workflow steps involving: {}", remaining.join(", "));
    }

    Ok(ordered.into_iter().map(|name| lookup[name]).collect())
}

/// Execute a prepared step once using the provided runner.
///
/// Runner errors and panics become a failed outcome; they never escape the step.
pub fn run_step_with(step: &PreparedStep, run_context: &RunContext, runner: &dyn StepRunner) -> StepResult {
    let started = Instant::now();
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| runner.run(&step.run, &step.with, run_context)));
    let (status, outcome) = match attempt {
        Ok(Ok(outcome)) if outcome.success => (StepStatus::Succeeded, outcome),
        Ok(Ok(outcome)) => (StepStatus::Failed, outcome),
        Ok(Err(err)) => (StepStatus::Failed, Outcome::failed(format!("step '{}' failed: {err:#}", step.name))),
        Err(_) => {
            warn!(workflow = %run_context.workflow, step = %step.name, "step runner panicked");
            (StepStatus::Failed, Outcome::failed(format!("step '{}' panicked", step.name)))
        }
    };

    StepResult {
        name: step.name.clone(),
        status,
        outcome,
        duration_ms: started.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// One result per executed step, in execution order.
    pub results: Vec<StepResult>,
    /// Steps that did not run because a dependency failed or the run was cancelled.
    pub skipped: Vec<String>,
    /// Combined outcome of the whole run.
    pub aggregate: Outcome,
    pub cancelled: bool,
}

/// Execute every step of `definition` with its current effective parameters.
///
/// An unusable plan (duplicate names, unknown dependencies, cycles) does not raise; it produces a
/// report with no step results and a failed aggregate. Cancellation is observed between steps.
pub fn execute_workflow(definition: &WorkflowDefinition, runner: &dyn StepRunner, cancellation: &CancellationToken) -> RunReport {
    let mut run_context = RunContext::for_definition(definition);
    let plan = match prepare_plan(definition, &run_context) {
        Ok(plan) => plan,
        Err(err) => {
            warn!(workflow = %definition.workflow, error = %err, "invalid execution plan");
            return RunReport {
                aggregate: Outcome::failed(format!("invalid execution plan: {err:#}")),
                ..Default::default()
            };
        }
    };

    let mut report = RunReport::default();
    let mut statuses: HashMap<&str, StepStatus> = HashMap::new();

    for step in &plan.steps {
        if cancellation.is_cancelled() {
            report.cancelled = true;
            report.skipped.push(step.name.clone());
            continue;
        }

        if let Some(dependency) = blocking_dependency(step, &statuses) {
            debug!(workflow = %definition.workflow, step = %step.name, dependency, "skipping step after failed dependency");
            report.skipped.push(step.name.clone());
            continue;
        }

        let result = run_step_with(step, &run_context, runner);
        debug!(
            workflow = %definition.workflow,
            step = %result.name,
            status = ?result.status,
            duration_ms = result.duration_ms,
            "step finished"
        );
        run_context.steps.insert(step.name.clone(), result.outcome.output.clone());
        statuses.insert(step.name.as_str(), result.status);
        report.results.push(result);
    }

    report.aggregate = aggregate_outcome(&report.results, report.cancelled);
    report
}

/// First dependency of `step` that did not succeed. Dependencies that were skipped are absent
/// from `statuses` and block as well.
fn blocking_dependency<'a>(step: &'a PreparedStep, statuses: &HashMap<&str, StepStatus>) -> Option<&'a str> {
    step.depends_on
        .iter()
        .find(|dependency| statuses.get(dependency.as_str()) != Some(&StepStatus::Succeeded))
        .map(String::as_str)
}

/// Fold step results into the run's aggregate outcome.
///
/// Success holds when no executed step failed and the run was not cancelled. Error counts are
/// summed; files and logs accumulate in emission order; rows and output come from the last
/// executed step.
pub fn aggregate_outcome(results: &[StepResult], cancelled: bool) -> Outcome {
    let mut aggregate = Outcome::default();
    for result in results {
        aggregate.success &= result.status == StepStatus::Succeeded;
        aggregate.errors += result.outcome.errors;
        aggregate.files.extend(result.outcome.files.iter().cloned());
        aggregate.logs.extend(result.outcome.logs.iter().cloned());
    }
    if let Some(last) = results.last() {
        aggregate.rows = last.outcome.rows.clone();
        aggregate.output = last.outcome.output.clone();
    }
    if cancelled {
        aggregate.success = false;
        aggregate.logs.push("run cancelled before all steps executed".to_string());
    }
    aggregate
}
