//! Policies deciding which steps callers may address directly for their result.

/// Decides whether a step name is a valid output candidate.
pub trait OutputNamePolicy: Send + Sync {
    fn is_valid_output_candidate(&self, step_name: &str) -> bool;
}

/// Accepts steps whose name starts with a fixed prefix (`OUTPUT` by default).
///
/// Matching is case-sensitive, like result lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixOutputPolicy {
    prefix: String,
}

impl PrefixOutputPolicy {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for PrefixOutputPolicy {
    fn default() -> Self {
        Self::new(crate::resolve::DEFAULT_OUTPUT_STEP_NAME)
    }
}

impl OutputNamePolicy for PrefixOutputPolicy {
    fn is_valid_output_candidate(&self, step_name: &str) -> bool {
        !step_name.is_empty() && step_name.starts_with(&self.prefix)
    }
}

/// Accepts every named step.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyStepPolicy;

impl OutputNamePolicy for AnyStepPolicy {
    fn is_valid_output_candidate(&self, step_name: &str) -> bool {
        !step_name.is_empty()
    }
}
