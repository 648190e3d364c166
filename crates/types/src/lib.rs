//! Shared type definitions for Jobline.
//!
//! These types cross crate boundaries: the engine produces them, the CLI and any surrounding
//! endpoint layer consume them.

pub mod workflow;

pub use workflow::{
    ExecutionKind, Outcome, ResolvedResult, RunRequest, StepResult, StepStatus, WorkflowDefinition, WorkflowParameter,
    WorkflowStepDefinition,
};
