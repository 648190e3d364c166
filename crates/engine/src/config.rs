use std::{env, fs, path::PathBuf, sync::Arc, time::Duration};

use dirs_next::config_dir;
use indexmap::IndexMap;
use jobline_util::expand_tilde;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    parameters::{ContextParameters, EnvContextParameters, LayeredContextParameters, StaticContextParameters},
    policy::PrefixOutputPolicy,
    resolve::DEFAULT_OUTPUT_STEP_NAME,
};

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "JOBLINE_CONFIG_PATH";

/// Engine-wide settings read from `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Step name answering requests that do not name one.
    pub default_output_step: String,
    /// Prefix a step name needs to be addressable as an output.
    pub output_prefix: String,
    /// Deadline for async runs; `None` waits indefinitely.
    pub run_timeout_secs: Option<u64>,
    /// Context parameters available to every run.
    pub base_parameters: IndexMap<String, String>,
    /// When set, environment variables with this prefix become context parameters too.
    pub environment_prefix: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_output_step: DEFAULT_OUTPUT_STEP_NAME.to_string(),
            output_prefix: DEFAULT_OUTPUT_STEP_NAME.to_string(),
            run_timeout_secs: None,
            base_parameters: IndexMap::new(),
            environment_prefix: None,
        }
    }
}

impl EngineConfig {
    /// Reads the configuration file, falling back to defaults when it is missing or malformed.
    pub fn load() -> Self {
        let path = default_config_path();
        if let Ok(content) = fs::read_to_string(&path)
            && let Ok(config) = serde_json::from_str(&content)
        {
            debug!(path = %path.display(), "loaded engine configuration");
            return config;
        }
        Self::default()
    }

    pub fn output_policy(&self) -> PrefixOutputPolicy {
        PrefixOutputPolicy::new(self.output_prefix.clone())
    }

    /// Configured base parameters, overlaid by prefixed environment variables when enabled.
    pub fn context_parameters(&self) -> Arc<dyn ContextParameters> {
        let mut layered = LayeredContextParameters::new().with_layer(StaticContextParameters::new(self.base_parameters.clone()));
        if let Some(prefix) = self.environment_prefix.as_deref().filter(|prefix| !prefix.is_empty()) {
            layered = layered.with_layer(EnvContextParameters::new(prefix));
        }
        Arc::new(layered)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Get the default path for the engine configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobline")
        .join("config.json")
}
