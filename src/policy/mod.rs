// src/policy/mod.rs
// Policy enforcement: YAML-declared rules evaluated against tool inputs and
// generated content before execution.

mod engine;
mod rules;

pub use engine::{PolicyEngine, Verdict};
pub use rules::{Action, Condition, PolicyNote, Rule, RulePack};

use std::collections::BTreeMap;

/// Flatten a tool's JSON input into the string context rules evaluate
/// against. Nested objects become dotted keys; arrays become indexed keys.
/// The tool name itself is available under "tool".
pub fn flatten_input(tool: &str, input: &serde_json::Value) -> BTreeMap<String, String> {
    let mut context = BTreeMap::new();
    context.insert("tool".to_string(), tool.to_string());
    flatten_value("", input, &mut context);
    context
}

fn flatten_value(prefix: &str, value: &serde_json::Value, out: &mut BTreeMap<String, String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_value(&path, nested, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, nested) in items.iter().enumerate() {
                flatten_value(&format!("{prefix}.{i}"), nested, out);
            }
        }
        serde_json::Value::Null => {}
        serde_json::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_produces_dotted_keys() {
        let input = serde_json::json!({
            "session_id": "s-1",
            "build_args": {"NODE_ENV": "production"},
            "ports": [3000, 9229],
            "push": true,
        });
        let context = flatten_input("build", &input);
        assert_eq!(context.get("tool").map(String::as_str), Some("build"));
        assert_eq!(context.get("session_id").map(String::as_str), Some("s-1"));
        assert_eq!(
            context.get("build_args.NODE_ENV").map(String::as_str),
            Some("production")
        );
        assert_eq!(context.get("ports.1").map(String::as_str), Some("9229"));
        assert_eq!(context.get("push").map(String::as_str), Some("true"));
    }
}
