//! Workflow definition loading.
//!
//! The engine never parses definitions on its own; it asks a [`DefinitionLoader`]. The bundled
//! [`FileDefinitionLoader`] reads YAML or JSON documents from the filesystem.

use std::{collections::HashSet, fs, path::Path};

use jobline_types::WorkflowDefinition;
use jobline_util::expand_tilde;
use tracing::debug;

use crate::error::LoadError;

/// Produces a [`WorkflowDefinition`] from a location identifier.
pub trait DefinitionLoader: Send + Sync {
    /// Load a fresh definition. Implementations must not cache mutable state between calls.
    fn load(&self, location: &str) -> Result<WorkflowDefinition, LoadError>;
}

/// Loads definitions from files, choosing the format from the extension.
///
/// `.json` files are parsed as JSON; everything else (including extensionless files) as YAML.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDefinitionLoader;

impl DefinitionLoader for FileDefinitionLoader {
    fn load(&self, location: &str) -> Result<WorkflowDefinition, LoadError> {
        if location.trim().is_empty() {
            return Err(LoadError::EmptyLocation);
        }
        let path = expand_tilde(location);
        let content = fs::read_to_string(&path).map_err(|source| LoadError::Io {
            location: location.to_string(),
            source,
        })?;
        debug!(location = %path.display(), bytes = content.len(), "read workflow definition");

        let mut definition = parse_definition(&path, &content).map_err(|message| LoadError::Parse {
            location: location.to_string(),
            message,
        })?;

        if definition.workflow.trim().is_empty() {
            definition.workflow = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "default".to_string());
        }
        validate_step_names(&definition).map_err(|reason| LoadError::Invalid {
            location: location.to_string(),
            reason,
        })?;

        Ok(definition)
    }
}

fn parse_definition(path: &Path, content: &str) -> Result<WorkflowDefinition, String> {
    let is_json = path
        .extension()
        .map(|extension| extension.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(content).map_err(|error| error.to_string())
    } else {
        serde_yaml::from_str(content).map_err(|error| error.to_string())
    }
}

fn validate_step_names(definition: &WorkflowDefinition) -> Result<(), String> {
    let mut seen = HashSet::new();
    for (index, step) in definition.steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(format!("step #{} has an empty name", index + 1));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(format!("duplicate step name '{}'", step.name));
        }
    }
    Ok(())
}
