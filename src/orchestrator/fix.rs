// src/orchestrator/fix.rs
// The AI-driven fix loop.
//
// Runs inside a step's error path: classify the failure through the
// analyzer, route (step, category) to a workspace artifact, apply the
// proposed fix atomically, retry. Attempts are bounded per step; fixes only
// ever touch workspace files, never the session store directly.

use std::collections::BTreeMap;

use crate::drivers::FailureCategory;
use crate::error::{ErrorCategory, KitError, Result};
use crate::tools::ToolContext;
use crate::workspace::Workspace;

use super::WorkflowOptions;

/// Execute a step, re-running it under analyzer-guided fixes until it
/// succeeds or the step's attempt budget is exhausted. Steps without a
/// budget (everything but build/deploy/manifest by default) fail on the
/// first error.
pub async fn run_step_with_fixes(
    ctx: &impl ToolContext,
    session_id: &str,
    step: &str,
    options: &WorkflowOptions,
) -> Result<serde_json::Value> {
    let budget = ctx.env().fix_budgets.for_step(step).max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match super::execute_step(ctx, session_id, step, options).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                // Validation and policy failures are fatal by contract, and
                // cancellation must propagate untouched.
                if matches!(
                    e.category,
                    ErrorCategory::Validation | ErrorCategory::Policy | ErrorCategory::Cancelled
                ) {
                    return Err(e);
                }
                if attempt >= budget {
                    return Err(e);
                }

                match apply_fix(ctx, session_id, step, &e).await {
                    Ok(true) => {
                        tracing::info!(
                            step,
                            attempt,
                            "fix applied, retrying ({}/{})",
                            attempt + 1,
                            budget
                        );
                        let step_name = step.to_string();
                        ctx.store()
                            .update_workflow(session_id, move |wf| {
                                if let Some(state) = wf.step_mut(&step_name) {
                                    state.attempts += 1;
                                    state.message =
                                        Some("retrying after applied fix".to_string());
                                }
                            })
                            .await?;
                    }
                    Ok(false) => return Err(e),
                    Err(fix_err) => {
                        // Analyzer unavailability never masks the step error.
                        tracing::warn!(step, "fix loop gave up: {}", fix_err);
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Which workspace artifact a (step, failure category) pair may rewrite.
/// Anything outside this table is not fixable by the loop.
fn route(step: &str, category: FailureCategory) -> Option<&'static str> {
    match (step, category) {
        ("build", FailureCategory::DependencyError) => Some("Dockerfile"),
        ("build", FailureCategory::DockerfileError) => Some("Dockerfile"),
        ("deploy", FailureCategory::ManifestError) => Some("manifests/"),
        ("deploy", FailureCategory::ResourceError) => Some("manifests/"),
        ("deploy", FailureCategory::TemplateError) => Some("manifests/"),
        ("deploy", FailureCategory::ValidationError) => Some("manifests/"),
        ("manifest", FailureCategory::ManifestError) => Some("manifests/"),
        ("manifest", FailureCategory::TemplateError) => Some("manifests/"),
        ("manifest", FailureCategory::ValidationError) => Some("manifests/"),
        _ => None,
    }
}

/// Current workspace files the analyzer should see for a step.
fn collect_artifacts(workspace: &Workspace, step: &str) -> BTreeMap<String, String> {
    let mut artifacts = BTreeMap::new();

    if matches!(step, "build" | "dockerfile") {
        if let Ok(content) = workspace.read_to_string("Dockerfile") {
            artifacts.insert("Dockerfile".to_string(), content);
        }
    }
    if matches!(step, "deploy" | "manifest") {
        if let Ok(files) = workspace.list_files("manifests") {
            for file in files {
                if let (Some(name), Ok(content)) = (
                    file.file_name().and_then(|n| n.to_str()),
                    std::fs::read_to_string(&file),
                ) {
                    artifacts.insert(format!("manifests/{name}"), content);
                }
            }
        }
    }
    artifacts
}

/// Classify the failure and write the proposed fix into the workspace.
/// Returns whether anything was applied.
async fn apply_fix(
    ctx: &impl ToolContext,
    session_id: &str,
    step: &str,
    error: &KitError,
) -> Result<bool> {
    let workspace = ctx.store().workspaces().ensure(session_id)?;
    let artifacts = collect_artifacts(&workspace, step);

    let remediation = ctx
        .drivers()
        .analyzer
        .analyze(step, &error.to_wire(), &artifacts)
        .await?;

    tracing::info!(
        step,
        category = remediation.category.as_str(),
        "analyzer verdict: {}",
        remediation.summary
    );

    let Some(allowed_prefix) = route(step, remediation.category) else {
        return Ok(false);
    };

    let applicable: Vec<_> = remediation
        .artifacts
        .iter()
        .filter(|a| a.path == allowed_prefix || a.path.starts_with(allowed_prefix))
        .collect();
    if applicable.is_empty() {
        return Ok(false);
    }

    for artifact in &applicable {
        // Stage-then-rename keeps reads atomic while the step retries.
        workspace.write_atomic(&artifact.path, &artifact.content)?;
        tracing::debug!(path = %artifact.path, "fix artifact written");
    }

    // A rewritten Dockerfile must be reflected in the recorded dockerfile
    // result, which downstream consumers treat as canonical.
    if let Some(artifact) = applicable.iter().find(|a| a.path == "Dockerfile") {
        let content = artifact.content.clone();
        ctx.store()
            .update(session_id, move |session| {
                if let Some(value) = session.results.get_mut("dockerfile") {
                    value["content"] = serde_json::Value::String(content);
                }
            })
            .await?;
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_table_covers_the_contract() {
        assert_eq!(route("build", FailureCategory::DependencyError), Some("Dockerfile"));
        assert_eq!(route("build", FailureCategory::DockerfileError), Some("Dockerfile"));
        assert_eq!(route("deploy", FailureCategory::ManifestError), Some("manifests/"));
        assert_eq!(route("manifest", FailureCategory::TemplateError), Some("manifests/"));
        // Pull failures re-route through the orchestrator, not the fix loop.
        assert_eq!(route("deploy", FailureCategory::NetworkError), None);
        assert_eq!(route("scan", FailureCategory::DependencyError), None);
        assert_eq!(route("build", FailureCategory::Unknown), None);
    }

    #[test]
    fn collect_artifacts_reads_step_relevant_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = crate::workspace::WorkspaceManager::new(dir.path().to_path_buf());
        let workspace = manager.ensure("s-1").expect("ensure");
        workspace.write_atomic("Dockerfile", "FROM scratch\n").expect("write");
        workspace
            .write_atomic("manifests/deployment.yaml", "kind: Deployment\n")
            .expect("write");

        let build_artifacts = collect_artifacts(&workspace, "build");
        assert!(build_artifacts.contains_key("Dockerfile"));
        assert!(!build_artifacts.contains_key("manifests/deployment.yaml"));

        let deploy_artifacts = collect_artifacts(&workspace, "deploy");
        assert!(deploy_artifacts.contains_key("manifests/deployment.yaml"));
        assert!(!deploy_artifacts.contains_key("Dockerfile"));
    }
}
