// Template rendering - `{{variable}}` substitution from an event context

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

use super::events::EventContext;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

/// Replace every `{{key}}` with the context value for `key`.
///
/// Keys that are absent or null are left verbatim.
pub fn render(template: &str, context: &EventContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match context.get(&caps[1]) {
            Some(value) if !value.is_null() => display(value),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
