// src/drivers/analyzer.rs
// Failure analyzer implementations.
//
// The fix loop treats the analyzer as opaque: it hands over the step name,
// the structured error, and the current workspace artifacts, and gets back
// a failure category plus replacement artifacts. `LlmAnalyzer` asks an
// OpenAI-compatible chat endpoint; `RuleAnalyzer` applies local heuristics
// when no endpoint is configured.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::AnalyzerConfig;
use crate::error::{ErrorCategory, ErrorPayload, KitError, Result, Severity, codes};
use crate::utils::truncate;

use super::{Analyzer, FailureCategory, FixArtifact, Remediation};

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
const DEFAULT_MODEL: &str = "deepseek-chat";

const SYSTEM_PROMPT: &str = "You are a containerization failure analyst. \
Given a failed pipeline step, its structured error, and the current artifact \
files, classify the failure and propose fixed artifacts. Respond with JSON \
only, in the form {\"category\": \"dockerfile_error|dependency_error|\
manifest_error|resource_error|validation_error|template_error|network_error|\
unknown\", \"summary\": \"...\", \"artifacts\": [{\"path\": \"...\", \
\"content\": \"...\"}]}. Artifacts must be full replacement file contents. \
Return an empty artifacts array when no file change can help.";

/// Analyzer backed by an OpenAI-compatible chat completions endpoint.
pub struct LlmAnalyzer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmAnalyzer {
    pub fn from_config(config: &AnalyzerConfig, client: reqwest::Client) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    fn build_prompt(
        step: &str,
        error: &ErrorPayload,
        artifacts: &BTreeMap<String, String>,
    ) -> String {
        let mut prompt = format!(
            "Step: {step}\nError code: {}\nError category: {}\nError message: {}\n",
            error.code,
            error.category.as_str(),
            error.message
        );
        for (key, value) in &error.context {
            prompt.push_str(&format!("Context {key}: {value}\n"));
        }
        for (path, content) in artifacts {
            prompt.push_str(&format!(
                "\n--- {path} ---\n{}\n",
                truncate(content, 6_000)
            ));
        }
        prompt
    }

    /// Strip markdown code fences the model may wrap JSON in.
    fn extract_json(content: &str) -> &str {
        let trimmed = content.trim();
        let without_open = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .unwrap_or(trimmed);
        without_open.strip_suffix("```").unwrap_or(without_open).trim()
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(
        &self,
        step: &str,
        error: &ErrorPayload,
        artifacts: &BTreeMap<String, String>,
    ) -> Result<Remediation> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::build_prompt(step, error, artifacts)},
            ],
            "temperature": 0.0,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                KitError::new(
                    codes::ANALYZER_UNAVAILABLE,
                    ErrorCategory::System,
                    Severity::Medium,
                    format!("analyzer endpoint rejected the request: {e}"),
                )
                .caused_by(e)
            })?;

        let payload: serde_json::Value = response.json().await?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                KitError::new(
                    codes::ANALYZER_UNAVAILABLE,
                    ErrorCategory::System,
                    Severity::Medium,
                    "analyzer returned no content",
                )
            })?;

        serde_json::from_str::<Remediation>(Self::extract_json(content)).map_err(|e| {
            KitError::new(
                codes::ANALYZER_UNAVAILABLE,
                ErrorCategory::System,
                Severity::Medium,
                format!("analyzer returned unparseable remediation: {e}"),
            )
        })
    }
}

/// Heuristic analyzer used when no endpoint is configured. Covers the
/// failure shapes that show up constantly in practice; anything it cannot
/// place comes back as `unknown` with no artifacts, which makes the fix
/// loop give up and surface the original error.
pub struct RuleAnalyzer;

impl RuleAnalyzer {
    /// Add a system package install right after the first FROM line.
    fn add_system_packages(dockerfile: &str) -> Option<String> {
        let install_line = if dockerfile.contains("alpine") {
            "RUN apk add --no-cache build-base python3"
        } else if dockerfile.contains("debian") || dockerfile.contains("slim") {
            "RUN apt-get update && apt-get install -y --no-install-recommends build-essential && rm -rf /var/lib/apt/lists/*"
        } else {
            return None;
        };
        if dockerfile.contains(install_line) {
            return None; // already applied once; don't loop
        }

        let mut lines: Vec<&str> = dockerfile.lines().collect();
        let from_index = lines.iter().position(|l| l.trim_start().starts_with("FROM"))?;
        lines.insert(from_index + 1, install_line);
        Some(format!("{}\n", lines.join("\n")))
    }

    /// Pin a floating base image tag to a maintained concrete one.
    fn pin_latest(dockerfile: &str) -> Option<String> {
        const PINS: &[(&str, &str)] = &[
            ("node:latest", "node:20-alpine"),
            ("python:latest", "python:3.12-slim"),
            ("golang:latest", "golang:1.22-alpine"),
            ("rust:latest", "rust:1.80-slim"),
        ];
        for (from, to) in PINS {
            if dockerfile.contains(from) {
                return Some(dockerfile.replace(from, to));
            }
        }
        None
    }
}

#[async_trait]
impl Analyzer for RuleAnalyzer {
    async fn analyze(
        &self,
        _step: &str,
        error: &ErrorPayload,
        artifacts: &BTreeMap<String, String>,
    ) -> Result<Remediation> {
        let message = error.message.to_lowercase();
        let dockerfile = artifacts.get("Dockerfile");

        // Missing system dependency during build.
        if message.contains("not found") || message.contains("no such file") {
            if let Some(content) = dockerfile.and_then(|d| Self::add_system_packages(d)) {
                return Ok(Remediation {
                    category: FailureCategory::DependencyError,
                    summary: "missing system packages in the build image".to_string(),
                    artifacts: vec![FixArtifact {
                        path: "Dockerfile".to_string(),
                        content,
                    }],
                });
            }
        }

        // Unpinned base image that no longer resolves.
        if message.contains("manifest unknown") || message.contains("latest") {
            if let Some(content) = dockerfile.and_then(|d| Self::pin_latest(d)) {
                return Ok(Remediation {
                    category: FailureCategory::DockerfileError,
                    summary: "floating base image tag pinned".to_string(),
                    artifacts: vec![FixArtifact {
                        path: "Dockerfile".to_string(),
                        content,
                    }],
                });
            }
        }

        // Pull failures during deploy route back to a rebuild upstream.
        if message.contains("imagepullbackoff") || message.contains("errimagepull") {
            return Ok(Remediation {
                category: FailureCategory::NetworkError,
                summary: "image pull failure; the image likely needs a rebuild or re-push".to_string(),
                artifacts: vec![],
            });
        }

        // Malformed manifest YAML.
        if message.contains("error parsing") || message.contains("yaml") {
            return Ok(Remediation {
                category: FailureCategory::ManifestError,
                summary: "manifest failed to parse".to_string(),
                artifacts: vec![],
            });
        }

        Ok(Remediation {
            category: FailureCategory::Unknown,
            summary: "no matching heuristic".to_string(),
            artifacts: vec![],
        })
    }
}
