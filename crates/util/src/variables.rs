//! `${NAME}` variable substitution for step configuration.
//!
//! Placeholders whose name is not present in the variable table are left untouched so a
//! step can still see (and report) the literal reference.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::trace;

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)}").expect("variable placeholder pattern is valid"));

/// Replaces every `${NAME}` in `input` with the matching entry of `variables`.
pub fn substitute_variables(input: &str, variables: &IndexMap<String, String>) -> String {
    if !input.contains("${") {
        return input.to_string();
    }
    VARIABLE_PATTERN
        .replace_all(input, |captures: &Captures| match variables.get(&captures[1]) {
            Some(value) => {
                trace!(variable = &captures[1], "substituted variable");
                value.clone()
            }
            None => captures[0].to_string(),
        })
        .into_owned()
}

/// Recursively substitutes variables in every string inside a JSON value.
///
/// Object keys are left as authored; only values are rewritten.
pub fn substitute_value(value: &Value, variables: &IndexMap<String, String>) -> Value {
    match value {
        Value::String(text) => Value::String(substitute_variables(text, variables)),
        Value::Array(items) => Value::Array(items.iter().map(|item| substitute_value(item, variables)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, nested)| (key.clone(), substitute_value(nested, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variables() -> IndexMap<String, String> {
        let mut variables = IndexMap::new();
        variables.insert("TARGET".to_string(), "/srv/out".to_string());
        variables.insert("cpk.solution.dir".to_string(), "/opt/solution".to_string());
        variables
    }

    #[test]
    fn replaces_known_placeholders() {
        let result = substitute_variables("copy to ${TARGET} from ${cpk.solution.dir}", &variables());
        assert_eq!(result, "copy to /srv/out from /opt/solution");
    }

    #[test]
    fn keeps_unknown_placeholders_verbatim() {
        assert_eq!(substitute_variables("${MISSING}/x", &variables()), "${MISSING}/x");
    }

    #[test]
    fn substitutes_nested_json_strings_only() {
        let value = json!({
            "dir": "${TARGET}",
            "nested": { "items": ["${TARGET}", 3, true] },
            "count": 2
        });
        let result = substitute_value(&value, &variables());
        assert_eq!(result["dir"], "/srv/out");
        assert_eq!(result["nested"]["items"][0], "/srv/out");
        assert_eq!(result["nested"]["items"][1], 3);
        assert_eq!(result["count"], 2);
    }
}
