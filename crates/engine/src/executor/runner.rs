use std::{path::PathBuf, process::Command, thread, time::Duration};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use jobline_types::Outcome;
use serde_json::{Value, json};
use tracing::debug;

use crate::executor::RunContext;

/// Execute a single step action.
///
/// Engines can provide concrete implementations that call shells, databases, or other backends.
/// Returning `Err` marks the step as failed; it never aborts the surrounding run.
pub trait StepRunner: Send + Sync {
    /// Execute `action` with the step's interpolated `with` configuration.
    ///
    /// Implementations may use `run_context` for read-only access to the effective parameters
    /// and to outputs of earlier steps.
    fn run(&self, action: &str, with: &IndexMap<String, Value>, run_context: &RunContext) -> Result<Outcome>;
}

/// A simple runner that returns a synthetic JSON payload. This allows tests and
/// previews without external side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRunner;

impl StepRunner for NoopRunner {
    fn run(&self, action: &str, with: &IndexMap<String, Value>, _run_context: &RunContext) -> Result<Outcome> {
        let mut obj = serde_json::Map::new();
        obj.insert("run".into(), Value::String(action.to_string()));
        if !with.is_empty() {
            obj.insert("with".into(), with_to_value(with));
        }
        Ok(Outcome::succeeded(Value::Object(obj)))
    }
}

/// Runner for the actions bundled with the engine.
///
/// - `echo`: returns `with` as the output and as a single row.
/// - `fail`: fails with `with.message`.
/// - `sleep`: waits `with.millis` milliseconds.
/// - `shell`: runs `with.command` through `sh -c` with the effective parameters exported as
///   environment variables. Stdout lines become rows; a non-zero exit fails the step. Paths listed
///   in `with.files` are reported as produced files.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinRunner;

impl StepRunner for BuiltinRunner {
    fn run(&self, action: &str, with: &IndexMap<String, Value>, run_context: &RunContext) -> Result<Outcome> {
        match action {
            "echo" => Ok(echo(with)),
            "fail" => {
                let message = with.get("message").and_then(Value::as_str).unwrap_or("step failed");
                bail!("{message}")
            }
            "sleep" => {
                let millis = with.get("millis").and_then(Value::as_u64).unwrap_or(0);
                thread::sleep(Duration::from_millis(millis));
                Ok(Outcome::succeeded(json!({ "slept_ms": millis })))
            }
            "shell" => run_shell(with, run_context),
            other => bail!("unknown action '{other}'"),
        }
    }
}

fn with_to_value(with: &IndexMap<String, Value>) -> Value {
    Value::Object(with.iter().map(|(key, value)| (key.clone(), value.clone())).collect())
}

fn echo(with: &IndexMap<String, Value>) -> Outcome {
    let output = with_to_value(with);
    Outcome {
        rows: vec![output.clone()],
        output,
        ..Default::default()
    }
}

fn run_shell(with: &IndexMap<String, Value>, run_context: &RunContext) -> Result<Outcome> {
    let command = with
        .get("command")
        .and_then(Value::as_str)
        .context("shell action requires a 'command' string")?;
    debug!(workflow = %run_context.workflow, command, "running shell step");

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .envs(&run_context.parameters)
        .output()
        .with_context(|| format!("failed to spawn shell for '{command}'"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let success = output.status.success();

    let mut logs: Vec<String> = stdout.lines().map(str::to_string).collect();
    logs.extend(stderr.lines().map(str::to_string));
    if !success {
        logs.push(format!("command exited with {}", output.status));
    }

    let files: Vec<PathBuf> = with
        .get("files")
        .and_then(Value::as_array)
        .map(|paths| paths.iter().filter_map(Value::as_str).map(PathBuf::from).collect())
        .unwrap_or_default();

    Ok(Outcome {
        success,
        errors: u64::from(!success),
        rows: stdout.lines().map(|line| Value::String(line.to_string())).collect(),
        files,
        logs,
        output: json!({ "exit_code": output.status.code(), "stdout": stdout }),
    })
}
