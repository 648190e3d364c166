//! # Jobline Engine
//!
//! The Jobline engine turns a pre-built, multi-step workflow ("job") into a request/response unit:
//! given runtime parameters it runs every step to completion and answers with the result of one
//! designated step, or with the run's aggregate outcome when that step is not addressable.
//!
//! ## Usage
//!
//! ```rust
//! use jobline_engine::{FileDefinitionLoader, JobElement};
//! use jobline_types::RunRequest;
//!
//! let temp_dir = tempfile::tempdir()?;
//! let path = temp_dir.path().join("greeting.yaml");
//! std::fs::write(&path, r#"
//! workflow: greeting
//! parameters:
//!   NAME:
//!     default: world
//! steps:
//!   - name: OUTPUT
//!     run: echo
//!     with:
//!       message: "hello ${NAME}"
//! "#)?;
//!
//! let element = JobElement::load("greeting", path.to_str().unwrap(), &FileDefinitionLoader)?;
//! let resolved = element.process_request(&RunRequest::new().with_parameter("NAME", "jobline"))?;
//! assert_eq!(resolved.outcome.output["message"], "hello jobline");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`loader`**: definition loading from YAML/JSON files
//! - **`parameters`**: request and context parameter overlays
//! - **`executor`**: plan preparation, step runners and aggregation
//! - **`run`**: single-use runs on a dedicated worker thread
//! - **`resolve`**: selection of the result answering a request
//! - **`element`**: the request/response wrapper tying it all together

pub mod config;
pub mod element;
pub mod error;
pub mod executor;
pub mod loader;
pub mod parameters;
pub mod policy;
pub mod resolve;
pub mod run;

// Re-export commonly used types for convenience
pub use config::EngineConfig;
pub use element::{JobElement, execute_fire_and_forget};
pub use error::{EngineError, LoadError};
pub use executor::{BuiltinRunner, NoopRunner, RunContext, RunReport, StepRunner, execute_workflow};
pub use loader::{DefinitionLoader, FileDefinitionLoader};
pub use parameters::{
    ContextParameters, EnvContextParameters, LayeredContextParameters, ParameterOverlay, StaticContextParameters, clear, inject,
};
pub use policy::{AnyStepPolicy, OutputNamePolicy, PrefixOutputPolicy};
pub use resolve::{DEFAULT_OUTPUT_STEP_NAME, list_valid_output_names, resolve_result};
pub use run::{RunStatus, WorkflowRun};
