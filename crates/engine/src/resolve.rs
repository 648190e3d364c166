//! Selection of the single result that answers a run request.
//!
//! A caller may name the step whose result it wants. The name only counts when the output policy
//! accepts it as a candidate; otherwise (and when no step with that name emitted a result) the
//! run's aggregate outcome answers instead.

use jobline_types::{ExecutionKind, ResolvedResult, WorkflowDefinition};
use tracing::debug;

use crate::{executor::RunReport, policy::OutputNamePolicy};

/// Step name used when a request does not name one.
pub const DEFAULT_OUTPUT_STEP_NAME: &str = "OUTPUT";

/// The requested output name when non-empty, otherwise `default_name`.
pub fn effective_output_name<'a>(requested: Option<&'a str>, default_name: &'a str) -> &'a str {
    match requested {
        Some(name) if !name.is_empty() => name,
        _ => default_name,
    }
}

/// Names of the definition's steps that the policy accepts, in declaration order.
pub fn list_valid_output_names(definition: &WorkflowDefinition, policy: &dyn OutputNamePolicy) -> Vec<String> {
    definition
        .step_names()
        .filter(|name| policy.is_valid_output_candidate(name))
        .map(str::to_string)
        .collect()
}

/// Choose the result answering a request.
///
/// When the effective output name is a valid candidate, the first emitted result with exactly
/// that name wins. Anything else falls back to the aggregate outcome.
pub fn resolve_result(
    definition: &WorkflowDefinition,
    report: &RunReport,
    requested: Option<&str>,
    default_name: &str,
    policy: &dyn OutputNamePolicy,
    kind: ExecutionKind,
) -> ResolvedResult {
    let name = effective_output_name(requested, default_name);
    let is_candidate = definition.step_names().any(|step| step == name) && policy.is_valid_output_candidate(name);

    if is_candidate && let Some(result) = report.results.iter().find(|result| result.name == name) {
        debug!(workflow = %definition.workflow, step = name, "resolved result from step");
        return ResolvedResult {
            kind,
            step: Some(result.name.clone()),
            outcome: result.outcome.clone(),
        };
    }

    debug!(workflow = %definition.workflow, requested = name, candidate = is_candidate, "resolved aggregate result");
    ResolvedResult {
        kind,
        step: None,
        outcome: report.aggregate.clone(),
    }
}
