//! Strongly typed workflow schema and run result definitions shared across the engine and the CLI.
//!
//! Definitions preserve authoring order (via `IndexMap` and `Vec`) because output names are
//! advertised, and steps are scanned, in the order they were declared.

use std::{fmt, path::PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Describes an authored workflow ("job"): metadata, declared parameters, and ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkflowDefinition {
    /// Canonical workflow identifier (for example, `daily_export`).
    #[serde(default)]
    pub workflow: String,
    /// Optional human-readable title.
    #[serde(default)]
    pub title: Option<String>,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Declared parameters keyed by name, preserving author order.
    #[serde(default)]
    pub parameters: IndexMap<String, WorkflowParameter>,
    /// Ordered list of steps ("job entries").
    #[serde(default)]
    pub steps: Vec<WorkflowStepDefinition>,
}

impl WorkflowDefinition {
    /// Returns the title when present and non-blank, otherwise the identifier.
    pub fn display_name(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => &self.workflow,
        }
    }

    /// Step names in declaration order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.name.as_str())
    }

    /// Declared parameter names in declaration order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }

    /// Resolves every declared parameter to its effective value.
    pub fn effective_parameters(&self) -> IndexMap<String, String> {
        self.parameters
            .iter()
            .map(|(name, parameter)| (name.clone(), parameter.effective_value().to_string()))
            .collect()
    }
}

/// A declared workflow parameter.
///
/// The effective value is `value` when set, otherwise `default`, otherwise the empty string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkflowParameter {
    /// Value used when nothing else was supplied.
    #[serde(default)]
    pub default: Option<String>,
    /// Current value for the next run. Usually populated at runtime rather than authored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Descriptive text explaining the purpose of the parameter.
    #[serde(default)]
    pub description: Option<String>,
}

impl WorkflowParameter {
    /// Declares a parameter whose default is `default`.
    pub fn with_default(default: impl Into<String>) -> Self {
        Self {
            default: Some(default.into()),
            ..Default::default()
        }
    }

    pub fn effective_value(&self) -> &str {
        self.value.as_deref().or(self.default.as_deref()).unwrap_or_default()
    }
}

/// A single step inside a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkflowStepDefinition {
    /// Unique name within the workflow; doubles as the addressable output key.
    pub name: String,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Action identifier interpreted by the step runner (for example, `shell`).
    pub run: String,
    /// Names of steps that must succeed before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Step-specific configuration. String values may reference parameters as `${NAME}`.
    #[serde(default)]
    pub with: IndexMap<String, JsonValue>,
}

/// Final status of an executed step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step ran and reported success.
    Succeeded,
    /// The step ran and reported (or raised) a failure.
    Failed,
}

/// Outcome payload of a step or of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    /// Whether the unit of work succeeded.
    pub success: bool,
    /// Number of errors encountered.
    #[serde(default)]
    pub errors: u64,
    /// Result rows produced.
    #[serde(default)]
    pub rows: Vec<JsonValue>,
    /// Files produced or touched.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Log lines captured while running.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Arbitrary structured output.
    #[serde(default)]
    pub output: JsonValue,
}

impl Default for Outcome {
    fn default() -> Self {
        Self {
            success: true,
            errors: 0,
            rows: Vec::new(),
            files: Vec::new(),
            logs: Vec::new(),
            output: JsonValue::Null,
        }
    }
}

impl Outcome {
    /// A successful outcome carrying `output`.
    pub fn succeeded(output: JsonValue) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    /// A failed outcome with a single error and log line.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: 1,
            logs: vec![message.into()],
            ..Default::default()
        }
    }
}

/// Result emitted once per executed step, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    /// Name of the step that produced this result.
    pub name: String,
    pub status: StepStatus,
    pub outcome: Outcome,
    /// Wall-clock duration of the step.
    #[serde(default)]
    pub duration_ms: u64,
}

/// Kind of executable unit that produced a result, used by downstream formatters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    /// A multi-step workflow.
    Job,
    /// A single transformation-like unit.
    Transformation,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionKind::Job => "job",
            ExecutionKind::Transformation => "transformation",
        }
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller request for one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunRequest {
    /// Parameter values to inject for this run. `None` and an empty map are equivalent.
    #[serde(default)]
    pub parameters: Option<IndexMap<String, String>>,
    /// Name of the step whose result should answer the request.
    #[serde(default)]
    pub output_step_name: Option<String>,
}

impl RunRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter value to the request.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.get_or_insert_with(IndexMap::new).insert(name.into(), value.into());
        self
    }

    /// Selects the step whose result answers the request.
    pub fn with_output_step(mut self, name: impl Into<String>) -> Self {
        self.output_step_name = Some(name.into());
        self
    }
}

/// The single result chosen to answer a [`RunRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedResult {
    pub kind: ExecutionKind,
    /// Step the outcome came from; `None` when the run's aggregate result was used.
    pub step: Option<String>,
    pub outcome: Outcome,
}

impl ResolvedResult {
    pub fn is_aggregate(&self) -> bool {
        self.step.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_authored_yaml_definition() {
        let yaml = r#"
workflow: nightly_export
title: Nightly export
parameters:
  TARGET:
    default: /tmp/out
    description: Output directory
  REGION: {}
steps:
  - name: prepare
    run: echo
    with:
      dir: "${TARGET}"
  - name: OUTPUT
    run: shell
    depends_on: [prepare]
    with:
      command: ls
"#;
        let definition: WorkflowDefinition = serde_yaml::from_str(yaml).expect("parse definition");

        assert_eq!(definition.display_name(), "Nightly export");
        assert_eq!(definition.parameter_names(), vec!["TARGET", "REGION"]);
        assert_eq!(definition.step_names().collect::<Vec<_>>(), vec!["prepare", "OUTPUT"]);
        assert_eq!(definition.steps[1].depends_on, vec!["prepare"]);
        assert_eq!(definition.steps[0].with["dir"], json!("${TARGET}"));
    }

    #[test]
    fn effective_value_prefers_value_then_default() {
        let mut parameter = WorkflowParameter::with_default("fallback");
        assert_eq!(parameter.effective_value(), "fallback");

        parameter.value = Some("override".into());
        assert_eq!(parameter.effective_value(), "override");

        assert_eq!(WorkflowParameter::default().effective_value(), "");
    }

    #[test]
    fn display_name_falls_back_to_identifier_for_blank_titles() {
        let definition = WorkflowDefinition {
            workflow: "export".into(),
            title: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(definition.display_name(), "export");
    }

    #[test]
    fn run_request_builder_collects_parameters() {
        let request = RunRequest::new()
            .with_parameter("A", "1")
            .with_parameter("B", "2")
            .with_output_step("OUTPUT_main");

        let parameters = request.parameters.expect("parameters present");
        assert_eq!(parameters.get("A").map(String::as_str), Some("1"));
        assert_eq!(parameters.len(), 2);
        assert_eq!(request.output_step_name.as_deref(), Some("OUTPUT_main"));
    }

    #[test]
    fn failed_outcome_records_error_and_log() {
        let outcome = Outcome::failed("boom");
        assert!(!outcome.success);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.logs, vec!["boom"]);
        assert!(Outcome::default().success);
    }

    #[test]
    fn execution_kind_serializes_as_snake_case() {
        assert_eq!(serde_json::to_value(ExecutionKind::Job).unwrap(), json!("job"));
        assert_eq!(ExecutionKind::Transformation.to_string(), "transformation");
    }
}
