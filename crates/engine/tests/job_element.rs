use std::{fs, path::Path, sync::Arc, thread, time::Duration};

use anyhow::Result;
use indexmap::IndexMap;
use jobline_engine::{
    EngineError, FileDefinitionLoader, JobElement, LoadError, RunContext, StaticContextParameters, StepRunner, execute_fire_and_forget,
};
use jobline_types::{Outcome, RunRequest};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Answers every step with the names of the parameters visible to the run.
struct ParameterSnapshotRunner;

impl StepRunner for ParameterSnapshotRunner {
    fn run(&self, _action: &str, _with: &IndexMap<String, Value>, run_context: &RunContext) -> Result<Outcome> {
        thread::sleep(Duration::from_millis(5));
        Ok(Outcome::succeeded(json!(run_context.parameters)))
    }
}

fn write_definition(dir: &Path, file_name: &str, content: &str) -> String {
    let path = dir.join(file_name);
    fs::write(&path, content).expect("write definition");
    path.to_str().expect("utf-8 path").to_string()
}

const EXPORT_JOB: &str = r#"
workflow: export
parameters:
  TARGET:
    default: /tmp
steps:
  - name: extract
    run: echo
    with:
      source: "${SOURCE}"
  - name: OUTPUT
    run: echo
    depends_on: [extract]
    with:
      target: "${TARGET}"
      source: "${SOURCE}"
"#;

#[test]
fn request_parameters_reach_steps_and_are_removed_afterwards() {
    let temp_dir = tempfile::tempdir().unwrap();
    let location = write_definition(temp_dir.path(), "export.yaml", EXPORT_JOB);
    let element = JobElement::load("export", &location, &FileDefinitionLoader).expect("load");

    let request = RunRequest::new().with_parameter("SOURCE", "db").with_parameter("TARGET", "/srv");
    let resolved = element.process_request(&request).expect("run");

    assert!(resolved.outcome.success);
    assert_eq!(resolved.step.as_deref(), Some("OUTPUT"));
    assert_eq!(resolved.outcome.output, json!({"target": "/srv", "source": "db"}));
    assert_eq!(element.declared_parameters(), vec!["TARGET"]);

    // overwritten declared values persist into the next run, added keys do not
    let resolved = element.process_request(&RunRequest::new()).expect("second run");
    assert_eq!(resolved.outcome.output, json!({"target": "/srv", "source": "${SOURCE}"}));
}

#[test]
fn step_failure_is_reported_in_the_outcome() {
    let temp_dir = tempfile::tempdir().unwrap();
    let location = write_definition(
        temp_dir.path(),
        "failing.yaml",
        r#"
steps:
  - name: extract
    run: fail
    with:
      message: "source offline"
  - name: OUTPUT
    run: echo
    depends_on: [extract]
"#,
    );
    let element = JobElement::load("failing", &location, &FileDefinitionLoader).expect("load");

    let resolved = element.process_request(&RunRequest::new().with_parameter("RUN", "1")).expect("run returns");
    assert!(resolved.is_aggregate(), "OUTPUT never ran, so the aggregate answers");
    assert!(!resolved.outcome.success);
    assert_eq!(resolved.outcome.errors, 1);
    assert!(resolved.outcome.logs.iter().any(|line| line.contains("source offline")));
    assert!(element.declared_parameters().is_empty());
}

#[test]
fn invalid_plan_answers_with_failed_aggregate() {
    let temp_dir = tempfile::tempdir().unwrap();
    let location = write_definition(
        temp_dir.path(),
        "cyclic.json",
        r#"{"steps": [{"name": "OUTPUT", "run": "echo", "depends_on": ["b"]}, {"name": "b", "run": "echo", "depends_on": ["OUTPUT"]}]}"#,
    );
    let element = JobElement::load("cyclic", &location, &FileDefinitionLoader).expect("load");

    let resolved = element.process_request(&RunRequest::new()).expect("run returns");
    assert!(resolved.is_aggregate());
    assert!(!resolved.outcome.success);
    assert!(resolved.outcome.logs[0].contains("cycle detected"));
}

#[test]
fn load_failure_starts_nothing() {
    let temp_dir = tempfile::tempdir().unwrap();
    let missing = temp_dir.path().join("missing.yaml");
    let error = JobElement::load("missing", missing.to_str().unwrap(), &FileDefinitionLoader)
        .err()
        .expect("load should fail");
    assert!(matches!(error, LoadError::Io { .. }), "unexpected error: {error}");

    let engine_error: EngineError = error.into();
    assert!(engine_error.to_string().contains("missing.yaml"));
}

#[test]
fn concurrent_requests_on_one_element_see_only_their_own_parameters() {
    let temp_dir = tempfile::tempdir().unwrap();
    let location = write_definition(temp_dir.path(), "export.yaml", EXPORT_JOB);
    let element = Arc::new(
        JobElement::load("export", &location, &FileDefinitionLoader)
            .expect("load")
            .with_runner(Arc::new(ParameterSnapshotRunner)),
    );

    let handles: Vec<_> = (0..8)
        .map(|index| {
            let element = Arc::clone(&element);
            thread::spawn(move || {
                let key = format!("ONLY_{index}");
                let resolved = element
                    .process_request(&RunRequest::new().with_parameter(key.clone(), index.to_string()))
                    .expect("run");
                (key, resolved)
            })
        })
        .collect();

    for handle in handles {
        let (key, resolved) = handle.join().expect("thread");
        let mut visible: Vec<String> = resolved.outcome.output.as_object().expect("object").keys().cloned().collect();
        visible.sort();
        let mut expected = vec![key.clone(), "TARGET".to_string()];
        expected.sort();
        assert_eq!(visible, expected, "run for {key} saw {visible:?}");
    }
    assert_eq!(element.declared_parameters(), vec!["TARGET"]);
}

#[test]
fn distinct_elements_run_independently() {
    let temp_dir = tempfile::tempdir().unwrap();
    let first_location = write_definition(temp_dir.path(), "first.yaml", EXPORT_JOB);
    let second_location = write_definition(temp_dir.path(), "second.yaml", EXPORT_JOB);
    let first = Arc::new(
        JobElement::load("first", &first_location, &FileDefinitionLoader)
            .expect("load")
            .with_runner(Arc::new(ParameterSnapshotRunner)),
    );
    let second = Arc::new(
        JobElement::load("second", &second_location, &FileDefinitionLoader)
            .expect("load")
            .with_runner(Arc::new(ParameterSnapshotRunner)),
    );

    let spawn = |element: Arc<JobElement>, key: &'static str| {
        thread::spawn(move || {
            (0..5)
                .map(|_| element.process_request(&RunRequest::new().with_parameter(key, "1")).expect("run"))
                .collect::<Vec<_>>()
        })
    };
    let first_runs = spawn(Arc::clone(&first), "A_ONLY");
    let second_runs = spawn(Arc::clone(&second), "B_ONLY");

    for resolved in first_runs.join().expect("first thread") {
        let output = resolved.outcome.output.as_object().expect("object");
        assert!(output.contains_key("A_ONLY"));
        assert!(!output.contains_key("B_ONLY"));
    }
    for resolved in second_runs.join().expect("second thread") {
        let output = resolved.outcome.output.as_object().expect("object");
        assert!(output.contains_key("B_ONLY"));
        assert!(!output.contains_key("A_ONLY"));
    }
}

#[test]
fn fire_and_forget_swallows_load_errors() {
    let temp_dir = tempfile::tempdir().unwrap();
    let missing = temp_dir.path().join("nowhere.yaml");
    execute_fire_and_forget(
        missing.to_str().unwrap(),
        &FileDefinitionLoader,
        Arc::new(jobline_engine::BuiltinRunner),
        &StaticContextParameters::default(),
    );
    execute_fire_and_forget("", &FileDefinitionLoader, Arc::new(jobline_engine::BuiltinRunner), &StaticContextParameters::default());
}

#[cfg(unix)]
#[test]
fn fire_and_forget_runs_with_base_parameters() {
    let temp_dir = tempfile::tempdir().unwrap();
    let location = write_definition(
        temp_dir.path(),
        "touch.yaml",
        r#"
steps:
  - name: OUTPUT
    run: shell
    with:
      command: 'touch "$OUT_DIR/marker"'
"#,
    );
    let context = StaticContextParameters::new(
        [("OUT_DIR".to_string(), temp_dir.path().to_string_lossy().into_owned())]
            .into_iter()
            .collect(),
    );

    execute_fire_and_forget(&location, &FileDefinitionLoader, Arc::new(jobline_engine::BuiltinRunner), &context);
    assert!(temp_dir.path().join("marker").exists());
}

const SLOW_JOB: &str = r#"
workflow: slow
steps:
  - name: first
    run: sleep
    with:
      millis: 200
  - name: second
    run: sleep
    depends_on: [first]
    with:
      millis: 200
  - name: OUTPUT
    run: echo
    depends_on: [second]
"#;

#[tokio::test]
async fn deadline_cancels_the_run_and_still_clears_parameters() {
    let temp_dir = tempfile::tempdir().unwrap();
    let location = write_definition(temp_dir.path(), "slow.yaml", SLOW_JOB);
    let element = Arc::new(JobElement::load("slow", &location, &FileDefinitionLoader).expect("load"));

    let error = Arc::clone(&element)
        .process_request_async(
            RunRequest::new().with_parameter("RUN_ID", "1"),
            CancellationToken::new(),
            Some(Duration::from_millis(50)),
        )
        .await
        .expect_err("deadline");
    assert!(matches!(error, EngineError::DeadlineExceeded { .. }), "unexpected error: {error}");

    // a follow-up request waits for the cancelled run to release the definition
    let resolved = Arc::clone(&element)
        .process_request_async(RunRequest::new(), CancellationToken::new(), None)
        .await
        .expect("follow-up run");
    assert!(resolved.outcome.success);
    assert!(element.declared_parameters().is_empty());
}

#[tokio::test]
async fn cancelled_request_answers_with_failed_aggregate() {
    let temp_dir = tempfile::tempdir().unwrap();
    let location = write_definition(temp_dir.path(), "slow.yaml", SLOW_JOB);
    let element = Arc::new(JobElement::load("slow", &location, &FileDefinitionLoader).expect("load"));

    let cancellation = CancellationToken::new();
    cancellation.cancel();
    let resolved = element
        .process_request_async(RunRequest::new(), cancellation, Some(Duration::from_secs(5)))
        .await
        .expect("cancelled run still answers");

    assert!(resolved.is_aggregate());
    assert!(!resolved.outcome.success);
}
