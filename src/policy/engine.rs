// src/policy/engine.rs
// Rule loading and evaluation.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;

use crate::error::{KitError, Result};

use super::rules::{Action, Condition, PolicyNote, Rule, RulePack};

/// A rule with its regex conditions compiled once at load time.
struct CompiledRule {
    rule: Rule,
    regexes: Vec<Option<Regex>>, // parallel to rule.conditions; None for functions
}

/// Evaluation outcome for one tool input.
#[derive(Debug, Default, Clone)]
pub struct Verdict {
    /// Highest-priority matching block, if any.
    pub block: Option<PolicyNote>,
    pub warnings: Vec<PolicyNote>,
    pub suggestions: Vec<PolicyNote>,
}

impl Verdict {
    /// Convert a blocking verdict into the error that aborts the call.
    pub fn into_block_error(self) -> Option<KitError> {
        self.block
            .map(|note| KitError::policy_blocked(&note.rule_id, note.message))
    }
}

/// Loaded rule set. Evaluation order is priority descending; duplicate rule
/// ids across packs resolve last-loaded-wins.
pub struct PolicyEngine {
    rules: Vec<CompiledRule>,
}

impl PolicyEngine {
    /// Engine with no rules; every input passes.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Load every `*.yaml` / `*.yml` pack in a directory (sorted by file
    /// name for deterministic last-wins semantics). A missing directory is
    /// an empty engine; a malformed pack is a fatal startup error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Ok(Self::empty());
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        let mut rules = Vec::new();
        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            let value: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|e| {
                KitError::system(format!("invalid policy pack {}: {e}", path.display()))
                    .caused_by(e)
            })?;
            // serde_yaml's enum support requires explicit YAML tags for
            // externally-tagged enums; round-trip through JSON so the plain
            // `variant: { ... }` mapping style used by policy packs parses.
            let json = serde_json::to_value(value).map_err(|e| {
                KitError::system(format!("invalid policy pack {}: {e}", path.display()))
                    .caused_by(e)
            })?;
            let pack: RulePack = serde_json::from_value(json).map_err(|e| {
                KitError::system(format!("invalid policy pack {}: {e}", path.display()))
                    .caused_by(e)
            })?;
            tracing::debug!("loaded {} policy rules from {}", pack.rules.len(), path.display());
            rules.extend(pack.rules);
        }
        Self::from_rules(rules)
    }

    /// Build an engine from an in-memory rule list (used by tests and by
    /// `load_dir` after concatenating packs).
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self> {
        // Last occurrence of an id wins.
        let mut deduped: Vec<Rule> = Vec::with_capacity(rules.len());
        for rule in rules {
            if let Some(existing) = deduped.iter_mut().find(|r| r.id == rule.id) {
                *existing = rule;
            } else {
                deduped.push(rule);
            }
        }
        // Stable sort keeps pack order among equal priorities.
        deduped.sort_by_key(|r| std::cmp::Reverse(r.priority));

        let mut compiled = Vec::with_capacity(deduped.len());
        for rule in deduped {
            let mut regexes = Vec::with_capacity(rule.conditions.len());
            for condition in &rule.conditions {
                match condition {
                    Condition::Regex { pattern, flags, .. } => {
                        let full = match flags.as_deref() {
                            Some(flags) if !flags.is_empty() => format!("(?{flags}){pattern}"),
                            _ => pattern.clone(),
                        };
                        let regex = Regex::new(&full).map_err(|e| {
                            KitError::system(format!(
                                "rule '{}': invalid regex '{pattern}': {e}",
                                rule.id
                            ))
                        })?;
                        regexes.push(Some(regex));
                    }
                    Condition::Function { name, .. } => {
                        if !FUNCTION_NAMES.contains(&name.as_str()) {
                            return Err(KitError::system(format!(
                                "rule '{}': unknown condition function '{name}'",
                                rule.id
                            )));
                        }
                        regexes.push(None);
                    }
                }
            }
            compiled.push(CompiledRule { rule, regexes });
        }
        Ok(Self { rules: compiled })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate all rules against a flat context. The first matching block
    /// (highest priority) wins; warnings and suggestions accumulate across
    /// every matching rule.
    pub fn evaluate(&self, context: &BTreeMap<String, String>) -> Verdict {
        let mut verdict = Verdict::default();

        for compiled in &self.rules {
            if !self.matches(compiled, context) {
                continue;
            }
            for action in &compiled.rule.actions {
                let note = |message: &str| PolicyNote {
                    rule_id: compiled.rule.id.clone(),
                    message: message.to_string(),
                };
                match action {
                    Action::Block(message) => {
                        if verdict.block.is_none() {
                            verdict.block = Some(note(message));
                        }
                    }
                    Action::Warn(message) => verdict.warnings.push(note(message)),
                    Action::Suggest(message) => verdict.suggestions.push(note(message)),
                }
            }
        }
        verdict
    }

    fn matches(&self, compiled: &CompiledRule, context: &BTreeMap<String, String>) -> bool {
        compiled
            .rule
            .conditions
            .iter()
            .zip(&compiled.regexes)
            .all(|(condition, regex)| match condition {
                Condition::Regex { field, .. } => {
                    #[allow(clippy::unwrap_used)] // compiled in from_rules for every Regex condition
                    let regex = regex.as_ref().unwrap();
                    match field {
                        Some(field) => context
                            .get(field)
                            .map(|value| regex.is_match(value))
                            .unwrap_or(false),
                        None => context.values().any(|value| regex.is_match(value)),
                    }
                }
                Condition::Function { name, args } => eval_function(name, args, context),
            })
    }
}

const FUNCTION_NAMES: &[&str] = &["has_key", "absent", "key_equals", "contains", "truthy"];

fn eval_function(name: &str, args: &[String], context: &BTreeMap<String, String>) -> bool {
    let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or("");
    match name {
        "has_key" => context.contains_key(arg(0)),
        "absent" => !context.contains_key(arg(0)),
        "key_equals" => context.get(arg(0)).map(String::as_str) == Some(arg(1)),
        "contains" => context
            .get(arg(0))
            .map(|v| v.contains(arg(1)))
            .unwrap_or(false),
        "truthy" => matches!(
            context.get(arg(0)).map(String::as_str),
            Some("true") | Some("1") | Some("yes")
        ),
        _ => false,
    }
}
