// src/policy/rules.rs
// Serde types for YAML policy rule packs.

use serde::{Deserialize, Serialize};

/// A policy pack file: a list of rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulePack {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One prioritized match-and-act directive. A rule fires when all of its
/// conditions match the evaluation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub priority: i64,
    /// Free-form grouping label ("dockerfile", "registry", ...).
    #[serde(default)]
    pub category: Option<String>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

/// Condition kinds. `regex` matches a pattern against one named context
/// field, or any field when `field` is omitted. `function` looks up a
/// predicate by name in the engine's fixed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Regex {
        pattern: String,
        #[serde(default)]
        flags: Option<String>,
        #[serde(default)]
        field: Option<String>,
    },
    Function {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// What a matching rule does. `block` aborts the tool call; `warn` and
/// `suggest` are attached to the response without aborting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Block(String),
    Warn(String),
    Suggest(String),
}

/// A non-blocking note (warning or suggestion) attached to a tool response.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PolicyNote {
    pub rule_id: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_rule_pack() {
        let yaml = r#"
rules:
  - id: no-latest-tag
    priority: 100
    category: dockerfile
    conditions:
      - regex:
          pattern: 'FROM\s+\S+:latest\b'
          field: dockerfile_content
    actions:
      - block: "Base images must be pinned; ':latest' is not reproducible."
  - id: prefer-non-root
    conditions:
      - function:
          name: absent
          args: ["dockerfile_user"]
    actions:
      - suggest: "Add a USER instruction so the container does not run as root."
"#;
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).expect("parse yaml");
        let json = serde_json::to_value(value).expect("yaml to json");
        let pack: RulePack = serde_json::from_value(json).expect("parse");
        assert_eq!(pack.rules.len(), 2);
        assert_eq!(pack.rules[0].id, "no-latest-tag");
        assert_eq!(pack.rules[0].priority, 100);
        assert!(matches!(pack.rules[0].actions[0], Action::Block(_)));
        assert_eq!(pack.rules[1].priority, 0);
        assert!(matches!(
            pack.rules[1].conditions[0],
            Condition::Function { .. }
        ));
    }
}
