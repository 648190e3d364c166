//! Parameter injection lifecycle for shared workflow definitions.
//!
//! A definition is loaded once and reused for many runs, so request parameters are layered on
//! top of it for the duration of a single run and removed again afterwards. Keys the definition
//! already declares are overwritten in place and stay that way; only keys that were added for the
//! run are removed.
//!
//! Context parameters (plugin directories, the invoking user, ...) come from a
//! [`ContextParameters`] provider and are refreshed before request parameters are applied, so a
//! request can always override them.

use std::{env, ops::Deref};

use indexmap::IndexMap;
use jobline_types::{WorkflowDefinition, WorkflowParameter};
use tracing::debug;

/// Supplies baseline parameters from the surrounding environment.
pub trait ContextParameters: Send + Sync {
    /// Current values of every context parameter, keyed by name.
    fn parameters(&self) -> IndexMap<String, String>;
}

/// A fixed table of context parameters, typically built from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticContextParameters {
    values: IndexMap<String, String>,
}

impl StaticContextParameters {
    pub fn new(values: IndexMap<String, String>) -> Self {
        Self { values }
    }
}

impl ContextParameters for StaticContextParameters {
    fn parameters(&self) -> IndexMap<String, String> {
        self.values.clone()
    }
}

/// Exposes process environment variables that start with `prefix` as context parameters.
///
/// The prefix is stripped, so `JOBLINE_PARAM_TARGET` becomes `TARGET` for prefix
/// `JOBLINE_PARAM_`. Variables are read on every call.
#[derive(Debug, Clone)]
pub struct EnvContextParameters {
    prefix: String,
}

impl EnvContextParameters {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl ContextParameters for EnvContextParameters {
    fn parameters(&self) -> IndexMap<String, String> {
        // entries that are not valid unicode cannot become parameters and are skipped
        let mut values: IndexMap<String, String> = env::vars_os()
            .filter_map(|(key, value)| {
                let key = key.into_string().ok()?;
                let value = value.into_string().ok()?;
                let name = key.strip_prefix(&self.prefix).filter(|name| !name.is_empty())?;
                Some((name.to_string(), value))
            })
            .collect();
        values.sort_keys();
        values
    }
}

/// Merges several providers; later layers win when names collide.
#[derive(Default)]
pub struct LayeredContextParameters {
    layers: Vec<Box<dyn ContextParameters>>,
}

impl LayeredContextParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: impl ContextParameters + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }
}

impl ContextParameters for LayeredContextParameters {
    fn parameters(&self) -> IndexMap<String, String> {
        let mut merged = IndexMap::new();
        for layer in &self.layers {
            merged.extend(layer.parameters());
        }
        merged
    }
}

/// Declares every request parameter the definition lacks and overwrites the value of those it
/// already declares.
///
/// Returns the keys that were newly declared; pass them to [`clear`] after the run. `None` and an
/// empty map are a no-op.
pub fn inject(definition: &mut WorkflowDefinition, parameters: Option<&IndexMap<String, String>>) -> Vec<String> {
    let Some(parameters) = parameters else {
        return Vec::new();
    };

    let mut added = Vec::new();
    for (name, value) in parameters {
        match definition.parameters.get_mut(name) {
            Some(existing) => existing.value = Some(value.clone()),
            None => {
                definition.parameters.insert(
                    name.clone(),
                    WorkflowParameter {
                        default: Some(value.clone()),
                        value: Some(value.clone()),
                        description: None,
                    },
                );
                added.push(name.clone());
            }
        }
    }

    if !added.is_empty() {
        debug!(workflow = %definition.workflow, added = ?added, "injected request parameters");
    }
    added
}

/// Removes previously injected keys, restoring the definition's declared parameter set.
pub fn clear(definition: &mut WorkflowDefinition, added: &[String]) {
    for name in added {
        definition.parameters.shift_remove(name);
    }
}

/// Declares every context parameter the definition does not declare yet, with an empty default.
pub fn add_base_parameters(definition: &mut WorkflowDefinition, context: &dyn ContextParameters) {
    for name in context.parameters().into_keys() {
        definition.parameters.entry(name).or_insert_with(|| WorkflowParameter {
            default: Some(String::new()),
            ..Default::default()
        });
    }
}

/// Sets the current value of every declared parameter that the context provides.
pub fn update_parameters(definition: &mut WorkflowDefinition, context: &dyn ContextParameters) {
    for (name, value) in context.parameters() {
        if let Some(parameter) = definition.parameters.get_mut(&name) {
            parameter.value = Some(value);
        }
    }
}

/// Request parameters applied to a definition for the lifetime of the guard.
///
/// Dropping the guard clears the injected keys, so the definition is restored on every exit
/// path, including unwinding.
pub struct ParameterOverlay<'a> {
    definition: &'a mut WorkflowDefinition,
    added: Vec<String>,
}

impl<'a> ParameterOverlay<'a> {
    pub fn apply(definition: &'a mut WorkflowDefinition, parameters: Option<&IndexMap<String, String>>) -> Self {
        let added = inject(definition, parameters);
        Self { definition, added }
    }

    /// Keys declared for this run only.
    pub fn added(&self) -> &[String] {
        &self.added
    }
}

impl Deref for ParameterOverlay<'_> {
    type Target = WorkflowDefinition;

    fn deref(&self) -> &WorkflowDefinition {
        &*self.definition
    }
}

impl Drop for ParameterOverlay<'_> {
    fn drop(&mut self) {
        clear(self.definition, &self.added);
    }
}
