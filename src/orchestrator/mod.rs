// src/orchestrator/mod.rs
// Stepwise pipeline engine behind `containerize_and_deploy`.
//
// A straight loop over the ten-step list: no generators, no implicit
// suspension. Cancellation is checked between steps; every yield point is an
// external call or a store transaction. The caller holds the session's
// workflow lock for the whole run, which is what serializes two workflows
// racing on the same session id.

pub mod fix;

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, ErrorPayload, KitError, Result};
use crate::session::{StepState, StepStatus, WorkflowState, WorkflowStatus};
use crate::tools::{self, ToolContext};

/// One pipeline step: its tool name and whether a compensator exists for
/// saga rollback.
pub struct StepDef {
    pub name: &'static str,
    pub compensatable: bool,
}

/// The canonical ten-step pipeline.
pub const PIPELINE: [StepDef; 10] = [
    StepDef { name: "analyze", compensatable: false },
    StepDef { name: "dockerfile", compensatable: true },
    StepDef { name: "build", compensatable: true },
    StepDef { name: "scan", compensatable: false },
    StepDef { name: "tag", compensatable: true },
    StepDef { name: "push", compensatable: true },
    StepDef { name: "manifest", compensatable: true },
    StepDef { name: "cluster", compensatable: false },
    StepDef { name: "deploy", compensatable: true },
    StepDef { name: "verify", compensatable: false },
];

fn step_index(name: &str) -> Option<usize> {
    PIPELINE.iter().position(|s| s.name == name)
}

/// Workflow input, assembled by the `containerize_and_deploy` tool.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub repo_path: String,
    pub image: String,
    pub tag: String,
    pub namespace: String,
    /// Extra references for the tag step; defaults to the build reference.
    pub registry_targets: Vec<String>,
    pub build_args: BTreeMap<String, String>,
    pub base_image: Option<String>,
    pub severity_threshold: String,
    pub fail_on_findings: bool,
    pub replicas: u32,
    pub env: BTreeMap<String, String>,
    pub ingress_host: Option<String>,
    pub cluster_context: Option<String>,
    pub provision_local_cluster: bool,
    pub verify_timeout_secs: u64,
    /// None inherits the configured default.
    pub saga: Option<bool>,
}

impl WorkflowOptions {
    pub fn build_reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    fn tag_targets(&self) -> Vec<String> {
        if self.registry_targets.is_empty() {
            vec![self.build_reference()]
        } else {
            self.registry_targets.clone()
        }
    }
}

/// Terminal outcome handed back to the workflow tool.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct WorkflowReport {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub steps: Vec<StepState>,
    pub compensation_log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    pub duration_ms: u64,
}

/// Run the pipeline against a session. The caller must hold the session's
/// workflow lock. Returns a report for every terminal state; `Err` is
/// reserved for infrastructure faults (store failures) that prevented the
/// workflow from even recording its own outcome.
pub async fn run(
    ctx: &impl ToolContext,
    session_id: &str,
    options: WorkflowOptions,
) -> Result<WorkflowReport> {
    let saga = options.saga.unwrap_or(ctx.env().saga_enabled);
    let started = Instant::now();
    let total = PIPELINE.len();

    ctx.store().get_or_create(session_id).await?;
    let names: Vec<&str> = PIPELINE.iter().map(|s| s.name).collect();
    let mut initial = WorkflowState::new(&names, saga);
    initial.status = WorkflowStatus::Running;
    let workflow_id = initial.workflow_id.clone();
    ctx.store().put_workflow(session_id, initial).await?;

    tracing::info!(workflow_id = %workflow_id, session_id, "workflow started");

    let cancel = ctx.cancel();
    let mut rebuilt_after_pull_failure = false;
    let mut i = 0;

    while i < total {
        let step = &PIPELINE[i];

        // Cancellation checked between steps.
        let cancel_requested = ctx
            .store()
            .get(session_id)
            .await?
            .workflow
            .map(|wf| wf.cancel_requested)
            .unwrap_or(false);
        if cancel.is_cancelled() || cancel_requested {
            return finish_cancelled(ctx, session_id, step.name, saga, started).await;
        }

        let progress = format!("{}/{}", i + 1, total);
        let step_name = step.name.to_string();
        ctx.store()
            .update_workflow(session_id, move |wf| {
                wf.current_step = i;
                if let Some(state) = wf.step_mut(&step_name) {
                    state.status = StepStatus::Running;
                    state.attempts += 1;
                }
            })
            .await?;
        ctx.emit_progress(step.name, &progress, &format!("running {}", step.name))
            .await;

        let step_started = Instant::now();
        match fix::run_step_with_fixes(ctx, session_id, step.name, &options).await {
            Ok(value) => {
                ctx.store()
                    .mark_step_completed(
                        session_id,
                        step.name,
                        value,
                        step_started.elapsed().as_millis() as u64,
                        step.compensatable,
                    )
                    .await?;
                ctx.emit_progress(step.name, &progress, &format!("{} completed", step.name))
                    .await;
                i += 1;
            }
            Err(e) if e.category == ErrorCategory::Cancelled => {
                return finish_cancelled(ctx, session_id, step.name, saga, started).await;
            }
            Err(e) => {
                // An image pull failure during deploy usually means the
                // pushed image never landed; re-enter the pipeline at build
                // once before giving up.
                if step.name == "deploy" && !rebuilt_after_pull_failure && is_image_pull_failure(&e)
                {
                    if let Some(build_index) = step_index("build") {
                        tracing::warn!(
                            "deploy hit an image pull failure; re-entering the pipeline at build"
                        );
                        rebuilt_after_pull_failure = true;
                        ctx.store()
                            .update_workflow(session_id, move |wf| {
                                // Everything from build onward runs again.
                                for state in wf.steps.iter_mut().skip(build_index) {
                                    if matches!(
                                        state.status,
                                        StepStatus::Completed | StepStatus::Failed
                                    ) {
                                        state.status = StepStatus::Pending;
                                    }
                                }
                            })
                            .await?;
                        i = build_index;
                        continue;
                    }
                }

                ctx.store()
                    .mark_step_failed(session_id, step.name, e.to_wire())
                    .await?;
                tracing::error!(step = step.name, "workflow step failed: {}", e);

                let final_status = if saga {
                    compensate(ctx, session_id).await?;
                    WorkflowStatus::Compensated
                } else {
                    WorkflowStatus::Failed
                };
                return finish(ctx, session_id, final_status, Some(e.to_wire()), started).await;
            }
        }
    }

    // Completion is final: a cancel arriving after the last step's success
    // does not un-complete the workflow.
    finish(ctx, session_id, WorkflowStatus::Completed, None, started).await
}

fn is_image_pull_failure(err: &KitError) -> bool {
    let message = err.message.to_lowercase();
    message.contains("imagepullbackoff")
        || message.contains("errimagepull")
        || message.contains("pull access denied")
}

/// Dispatch one step to its tool implementation.
pub(crate) async fn execute_step(
    ctx: &impl ToolContext,
    session_id: &str,
    step: &str,
    options: &WorkflowOptions,
) -> Result<serde_json::Value> {
    let session = ctx.store().get(session_id).await?;

    macro_rules! to_value {
        ($result:expr) => {
            serde_json::to_value(&$result?).map_err(KitError::from)
        };
    }

    match step {
        "analyze" => to_value!(
            tools::analyze::execute(
                ctx,
                &session,
                &tools::analyze::AnalyzeParams {
                    repo_path: options.repo_path.clone(),
                },
            )
            .await
        ),
        "dockerfile" => to_value!(
            tools::dockerfile::execute(
                ctx,
                &session,
                &tools::dockerfile::DockerfileParams {
                    base_image: options.base_image.clone(),
                },
            )
            .await
        ),
        "build" => to_value!(
            tools::build::execute(
                ctx,
                &session,
                &tools::build::BuildParams {
                    image: options.image.clone(),
                    tag: options.tag.clone(),
                    build_args: options.build_args.clone(),
                },
            )
            .await
        ),
        "scan" => to_value!(
            tools::scan::execute(
                ctx,
                &session,
                &tools::scan::ScanParams {
                    reference: None,
                    severity_threshold: options.severity_threshold.clone(),
                    fail_on_findings: options.fail_on_findings,
                },
            )
            .await
        ),
        "tag" => to_value!(
            tools::tag::execute(
                ctx,
                &session,
                &tools::tag::TagParams {
                    targets: options.tag_targets(),
                },
            )
            .await
        ),
        "push" => to_value!(
            tools::push::execute(ctx, &session, &tools::push::PushParams { reference: None }).await
        ),
        "manifest" => to_value!(
            tools::manifest::execute(
                ctx,
                &session,
                &tools::manifest::ManifestParams {
                    namespace: options.namespace.clone(),
                    app_name: None,
                    replicas: options.replicas,
                    env: options.env.clone(),
                    resources: Default::default(),
                    ingress_host: options.ingress_host.clone(),
                },
            )
            .await
        ),
        "cluster" => to_value!(
            tools::cluster::execute(
                ctx,
                &session,
                &tools::cluster::ClusterParams {
                    context: options.cluster_context.clone(),
                    provision_local: options.provision_local_cluster,
                    name: None,
                },
            )
            .await
        ),
        "deploy" => to_value!(
            tools::deploy::execute(
                ctx,
                &session,
                &tools::deploy::DeployParams {
                    namespace: options.namespace.clone(),
                },
            )
            .await
        ),
        "verify" => to_value!(
            tools::verify::execute(
                ctx,
                &session,
                &tools::verify::VerifyParams {
                    timeout_secs: options.verify_timeout_secs,
                },
            )
            .await
        ),
        other => Err(KitError::system(format!("unknown workflow step '{other}'"))),
    }
}

/// Walk the compensation log in reverse, invoking each step's compensator.
/// Failures are recorded on the step and do not halt the walk; compensation
/// is not cancellable once begun.
async fn compensate(ctx: &impl ToolContext, session_id: &str) -> Result<()> {
    ctx.store()
        .update_workflow(session_id, |wf| {
            wf.status = WorkflowStatus::Compensating;
        })
        .await?;

    let session = ctx.store().get(session_id).await?;
    let log = session
        .workflow
        .as_ref()
        .map(|wf| wf.compensation_log.clone())
        .unwrap_or_default();

    for step in log.iter().rev() {
        // Only completed steps are rolled back.
        let completed = session
            .workflow
            .as_ref()
            .and_then(|wf| wf.steps.iter().find(|s| s.name == *step))
            .map(|s| s.status == StepStatus::Completed)
            .unwrap_or(false);
        if !completed {
            continue;
        }

        tracing::info!(step = %step, "compensating");
        let outcome = compensate_step(ctx, &session, step).await;
        let step_name = step.clone();
        match outcome {
            Ok(()) => {
                ctx.store()
                    .update_workflow(session_id, move |wf| {
                        if let Some(state) = wf.step_mut(&step_name) {
                            state.status = StepStatus::Compensated;
                        }
                    })
                    .await?;
            }
            Err(e) => {
                tracing::warn!(step = %step_name, "compensation failed: {}", e);
                let message = e.to_string();
                ctx.store()
                    .update_workflow(session_id, move |wf| {
                        if let Some(state) = wf.step_mut(&step_name) {
                            state.compensation_error = Some(message);
                        }
                    })
                    .await?;
            }
        }
    }
    Ok(())
}

async fn compensate_step(
    ctx: &impl ToolContext,
    session: &crate::session::Session,
    step: &str,
) -> Result<()> {
    let workspace = ctx.store().workspaces().ensure(&session.id)?;
    match step {
        "dockerfile" => {
            let path = workspace.resolve("Dockerfile")?;
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            Ok(())
        }
        "build" => {
            if let Some(build) = session.typed_result::<tools::build::BuildResult>("build") {
                ctx.drivers().docker.remove_tag(&build.reference).await?;
            }
            Ok(())
        }
        "tag" => {
            if let Some(tag) = session.typed_result::<tools::tag::TagResult>("tag") {
                for target in &tag.targets {
                    if target != &tag.source {
                        ctx.drivers().docker.remove_tag(target).await?;
                    }
                }
            }
            Ok(())
        }
        "push" => {
            // Deleting remote tags is unsafe in general (shared layers,
            // immutable tags); record the retained reference instead.
            if let Some(push) = session.typed_result::<tools::push::PushResult>("push") {
                tracing::info!(
                    reference = %push.reference,
                    digest = %push.digest,
                    "push compensation: remote reference retained"
                );
            }
            Ok(())
        }
        "manifest" => {
            for file in workspace.list_files("manifests")? {
                std::fs::remove_file(file)?;
            }
            Ok(())
        }
        "deploy" => {
            if let Some(deploy) = session.typed_result::<tools::deploy::DeployResult>("deploy") {
                let dir = workspace.resolve("manifests")?;
                ctx.drivers()
                    .cluster
                    .delete_manifests(&dir, &deploy.namespace)
                    .await?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn finish_cancelled(
    ctx: &impl ToolContext,
    session_id: &str,
    step: &str,
    saga: bool,
    started: Instant,
) -> Result<WorkflowReport> {
    let cancelled = KitError::cancelled();
    ctx.store()
        .mark_step_failed(session_id, step, cancelled.to_wire())
        .await?;
    tracing::info!(step, "workflow cancelled");

    if saga {
        compensate(ctx, session_id).await?;
    }
    finish(
        ctx,
        session_id,
        WorkflowStatus::Cancelled,
        Some(cancelled.to_wire()),
        started,
    )
    .await
}

async fn finish(
    ctx: &impl ToolContext,
    session_id: &str,
    status: WorkflowStatus,
    error: Option<ErrorPayload>,
    started: Instant,
) -> Result<WorkflowReport> {
    let session = ctx
        .store()
        .update_workflow(session_id, move |wf| {
            wf.status = status;
            wf.finished_at = Some(chrono::Utc::now());
        })
        .await?;

    let wf = session
        .workflow
        .ok_or_else(|| KitError::store("workflow state vanished mid-run"))?;

    tracing::info!(
        workflow_id = %wf.workflow_id,
        status = ?status,
        "workflow finished"
    );

    Ok(WorkflowReport {
        workflow_id: wf.workflow_id,
        status,
        steps: wf.steps,
        compensation_log: wf.compensation_log,
        error,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn pipeline_has_ten_ordered_steps() {
        assert_eq!(PIPELINE.len(), 10);
        assert_eq!(PIPELINE[0].name, "analyze");
        assert_eq!(PIPELINE[9].name, "verify");
        assert_eq!(step_index("build"), Some(2));
        assert_eq!(step_index("nope"), None);
    }

    #[test]
    fn image_pull_failures_are_recognized() {
        let err = KitError::deploy(codes::DEPLOY_FAILED, "pod stuck in ImagePullBackOff");
        assert!(is_image_pull_failure(&err));
        let other = KitError::deploy(codes::DEPLOY_FAILED, "quota exceeded");
        assert!(!is_image_pull_failure(&other));
    }

    #[test]
    fn tag_targets_default_to_build_reference() {
        let options = WorkflowOptions {
            repo_path: "/repo".into(),
            image: "acme/web".into(),
            tag: "1.0".into(),
            namespace: "default".into(),
            registry_targets: vec![],
            build_args: BTreeMap::new(),
            base_image: None,
            severity_threshold: "critical".into(),
            fail_on_findings: false,
            replicas: 1,
            env: BTreeMap::new(),
            ingress_host: None,
            cluster_context: None,
            provision_local_cluster: false,
            verify_timeout_secs: 60,
            saga: None,
        };
        assert_eq!(options.tag_targets(), vec!["acme/web:1.0".to_string()]);
    }
}
