// src/mcp/handlers.rs
// Per-tool handlers: typed request -> locked tool body -> typed output.
// Generic over ToolContext so the MCP router and the one-shot CLI share
// the same dispatch logic.

use crate::error::{KitError, Result};
use crate::orchestrator::{self, WorkflowOptions};
use crate::session::WorkflowStatus;
use crate::tools::{self, ToolContext, locked_call};

use super::requests::*;
use super::responses::*;


pub async fn analyze_handler<C: ToolContext>(ctx: &C, req: AnalyzeRequest) -> Result<Json<AnalyzeOutput>> {
    let params = tools::analyze::AnalyzeParams {
        repo_path: req.repo_path,
    };
    let facts = locked_call(ctx, &req.session_id, "analyze", |session| async move {
        tools::analyze::execute(ctx, &session, &params).await
    })
    .await?;

    let framework = facts
        .framework
        .as_deref()
        .map(|f| format!(" ({f})"))
        .unwrap_or_default();
    Ok(Json(AnalyzeOutput {
        message: format!(
            "Detected {}{} app; ports {:?}",
            facts.language, framework, facts.exposed_ports
        ),
        facts,
    }))
}

pub async fn dockerfile_handler<C: ToolContext>(
    ctx: &C,
    req: DockerfileRequest,
) -> Result<Json<DockerfileOutput>> {
    let params = tools::dockerfile::DockerfileParams {
        base_image: req.base_image,
    };
    let dockerfile = locked_call(ctx, &req.session_id, "dockerfile", |session| async move {
        tools::dockerfile::execute(ctx, &session, &params).await
    })
    .await?;

    Ok(Json(DockerfileOutput {
        message: format!("Dockerfile generated (base {})", dockerfile.base_image),
        dockerfile,
    }))
}

pub async fn build_handler<C: ToolContext>(ctx: &C, req: BuildRequest) -> Result<Json<BuildOutput>> {
    let params = tools::build::BuildParams {
        image: req.image,
        tag: req.tag.unwrap_or_else(|| "latest".to_string()),
        build_args: req.build_args.unwrap_or_default(),
    };
    let build = locked_call(ctx, &req.session_id, "build", |session| async move {
        tools::build::execute(ctx, &session, &params).await
    })
    .await?;

    Ok(Json(BuildOutput {
        message: format!(
            "Built {} ({:.1} MB) in {} ms",
            build.reference,
            build.size_bytes as f64 / 1_048_576.0,
            build.duration_ms
        ),
        build,
    }))
}

pub async fn scan_handler<C: ToolContext>(ctx: &C, req: ScanRequest) -> Result<Json<ScanOutput>> {
    let params = tools::scan::ScanParams {
        reference: req.reference,
        severity_threshold: req
            .severity_threshold
            .unwrap_or_else(|| "critical".to_string()),
        fail_on_findings: req.fail_on_findings.unwrap_or(false),
    };
    let scan = locked_call(ctx, &req.session_id, "scan", |session| async move {
        tools::scan::execute(ctx, &session, &params).await
    })
    .await?;

    Ok(Json(ScanOutput {
        message: format!(
            "Scanned {}: {} finding(s), {} at/above '{}'",
            scan.reference,
            scan.counts.total(),
            scan.findings_at_threshold,
            scan.severity_threshold
        ),
        scan,
    }))
}

pub async fn tag_handler<C: ToolContext>(ctx: &C, req: TagRequest) -> Result<Json<TagOutput>> {
    let params = tools::tag::TagParams {
        targets: req.targets,
    };
    let tag = locked_call(ctx, &req.session_id, "tag", |session| async move {
        tools::tag::execute(ctx, &session, &params).await
    })
    .await?;

    Ok(Json(TagOutput {
        message: format!("Tagged {} as {}", tag.source, tag.targets.join(", ")),
        tag,
    }))
}

pub async fn push_handler<C: ToolContext>(ctx: &C, req: PushRequest) -> Result<Json<PushOutput>> {
    let params = tools::push::PushParams {
        reference: req.reference,
    };
    let push = locked_call(ctx, &req.session_id, "push", |session| async move {
        tools::push::execute(ctx, &session, &params).await
    })
    .await?;

    Ok(Json(PushOutput {
        message: format!("Pushed {} ({})", push.reference, push.digest),
        push,
    }))
}

pub async fn manifest_handler<C: ToolContext>(
    ctx: &C,
    req: ManifestRequest,
) -> Result<Json<ManifestOutput>> {
    let mut resources = tools::manifest::ResourceLimits::default();
    if let Some(cpu) = req.cpu_limit {
        resources.cpu = cpu;
    }
    if let Some(memory) = req.memory_limit {
        resources.memory = memory;
    }
    let params = tools::manifest::ManifestParams {
        namespace: req.namespace.unwrap_or_else(|| "default".to_string()),
        app_name: req.app_name,
        replicas: req.replicas.unwrap_or(1),
        env: req.env.unwrap_or_default(),
        resources,
        ingress_host: req.ingress_host,
    };
    let manifest = locked_call(ctx, &req.session_id, "manifest", |session| async move {
        tools::manifest::execute(ctx, &session, &params).await
    })
    .await?;

    Ok(Json(ManifestOutput {
        message: format!(
            "Generated {} manifest file(s) for {} in namespace {}",
            manifest.files.len(),
            manifest.app_name,
            manifest.namespace
        ),
        manifest,
    }))
}

pub async fn cluster_handler<C: ToolContext>(ctx: &C, req: ClusterRequest) -> Result<Json<ClusterOutput>> {
    let params = tools::cluster::ClusterParams {
        context: req.context,
        provision_local: req.provision_local.unwrap_or(false),
        name: req.name,
    };
    let cluster = locked_call(ctx, &req.session_id, "cluster", |session| async move {
        tools::cluster::execute(ctx, &session, &params).await
    })
    .await?;

    Ok(Json(ClusterOutput {
        message: format!(
            "Cluster '{}' reachable{}",
            cluster.context,
            if cluster.provisioned { " (provisioned)" } else { "" }
        ),
        cluster,
    }))
}

pub async fn deploy_handler<C: ToolContext>(ctx: &C, req: DeployRequest) -> Result<Json<DeployOutput>> {
    let params = tools::deploy::DeployParams {
        namespace: req.namespace.unwrap_or_else(|| "default".to_string()),
    };
    let deploy = locked_call(ctx, &req.session_id, "deploy", |session| async move {
        tools::deploy::execute(ctx, &session, &params).await
    })
    .await?;

    Ok(Json(DeployOutput {
        message: format!(
            "Applied {} resource(s) to namespace {}",
            deploy.resources.len(),
            deploy.namespace
        ),
        deploy,
    }))
}

pub async fn verify_handler<C: ToolContext>(ctx: &C, req: VerifyRequest) -> Result<Json<VerifyOutput>> {
    let params = tools::verify::VerifyParams {
        timeout_secs: req.timeout_secs.unwrap_or(120),
    };
    let verify = locked_call(ctx, &req.session_id, "verify", |session| async move {
        tools::verify::execute(ctx, &session, &params).await
    })
    .await?;

    Ok(Json(VerifyOutput {
        message: format!(
            "Deployment {} ({}/{} pods ready)",
            verify.status, verify.ready_pods, verify.total_pods
        ),
        verify,
    }))
}

pub async fn workflow_handler<C: ToolContext>(
    ctx: &C,
    req: WorkflowRequest,
) -> Result<Json<WorkflowOutput>> {
    let options = WorkflowOptions {
        repo_path: req.repo_path,
        image: req.image,
        tag: req.tag.unwrap_or_else(|| "latest".to_string()),
        namespace: req.namespace.unwrap_or_else(|| "default".to_string()),
        registry_targets: req.registry_targets.unwrap_or_default(),
        build_args: req.build_args.unwrap_or_default(),
        base_image: req.base_image,
        severity_threshold: req
            .severity_threshold
            .unwrap_or_else(|| "critical".to_string()),
        fail_on_findings: req.fail_on_findings.unwrap_or(false),
        replicas: req.replicas.unwrap_or(1),
        env: req.env.unwrap_or_default(),
        ingress_host: req.ingress_host,
        cluster_context: req.cluster_context,
        provision_local_cluster: req.provision_local_cluster.unwrap_or(false),
        verify_timeout_secs: req.verify_timeout_secs.unwrap_or(120),
        saga: req.saga,
    };

    // The workflow lock is held for the entire run: two workflows racing on
    // one session id serialize here.
    let _guard = ctx.store().locks().acquire(&req.session_id).await;
    let report = orchestrator::run(ctx, &req.session_id, options).await?;

    match report.status {
        WorkflowStatus::Completed => {
            let summary = serde_json::json!({
                "workflow_id": report.workflow_id,
                "status": report.status,
                "duration_ms": report.duration_ms,
            });
            ctx
                .store()
                .record_result(&req.session_id, "containerize_and_deploy", summary)
                .await?;
            Ok(Json(WorkflowOutput {
                message: format!(
                    "Workflow {} completed: {} steps in {} ms",
                    report.workflow_id,
                    report.steps.len(),
                    report.duration_ms
                ),
                workflow: report,
            }))
        }
        status => {
            // Surface the original step error; the terminal report travels
            // in the error context so callers see the compensation log.
            let payload = report.error.clone();
            let mut err = match payload {
                Some(p) => {
                    let mut e = KitError::new(
                        crate::error::codes::WORKFLOW_FAILED,
                        p.category,
                        p.severity,
                        p.message.clone(),
                    );
                    for s in &p.suggestions {
                        e = e.with_suggestion(s.clone());
                    }
                    for (k, v) in &p.context {
                        e = e.with_context(k.clone(), v.clone());
                    }
                    e.with_context("original_code", &p.code)
                }
                None => KitError::deploy(
                    crate::error::codes::WORKFLOW_FAILED,
                    "workflow did not complete",
                ),
            };
            err = err
                .with_context("workflow_id", &report.workflow_id)
                .with_context("workflow_status", format!("{status:?}").to_lowercase())
                .with_context("compensation_log", report.compensation_log.join(","));
            if let Some(failed) = report
                .steps
                .iter()
                .find(|s| s.status == crate::session::StepStatus::Failed)
            {
                err = err.with_context("failed_step", &failed.name);
            }
            Err(err)
        }
    }
}

pub async fn cancel_handler<C: ToolContext>(
    ctx: &C,
    req: CancelWorkflowRequest,
) -> Result<Json<CancelWorkflowOutput>> {
    // Deliberately not taking the workflow lock: the running workflow holds
    // it, and this is a single atomic update.
    let session = ctx.store().request_cancel(&req.session_id).await?;
    let status = session.workflow.as_ref().map(|wf| wf.status);

    Ok(Json(CancelWorkflowOutput {
        message: match status {
            Some(WorkflowStatus::Running) => {
                "Cancellation requested; the workflow stops at the next step boundary".to_string()
            }
            Some(other) => format!("Workflow already {:?}", other).to_lowercase(),
            None => "No workflow attached to this session".to_string(),
        },
        session_id: req.session_id,
        workflow_status: status,
    }))
}

pub async fn list_sessions_handler<C: ToolContext>(
    ctx: &C,
    req: ListSessionsRequest,
) -> Result<Json<SessionListOutput>> {
    let params = tools::sessions::ListSessionsParams {
        limit: req.limit.unwrap_or(50),
        label: req.label,
    };
    let sessions = tools::sessions::list(ctx, &params).await?;

    Ok(Json(SessionListOutput {
        message: format!("{} session(s)", sessions.len()),
        total: sessions.len(),
        sessions,
    }))
}

pub async fn delete_session_handler<C: ToolContext>(
    ctx: &C,
    req: DeleteSessionRequest,
) -> Result<Json<DeleteSessionOutput>> {
    let result = tools::sessions::delete(ctx, &req.session_id).await?;
    Ok(Json(DeleteSessionOutput {
        message: if result.deleted {
            format!("Session {} deleted", result.id)
        } else {
            format!("Session {} did not exist", result.id)
        },
        id: result.id,
        deleted: result.deleted,
    }))
}

pub async fn logs_handler<C: ToolContext>(ctx: &C, req: GetLogsRequest) -> Result<Json<LogsOutput>> {
    let params = tools::logs::LogsParams {
        min_level: req.min_level,
        since: req.since,
        until: req.until,
        contains: req.contains,
        limit: req.limit,
        format: req.format,
    };
    let result = tools::logs::execute(ctx, &params).await?;

    Ok(Json(LogsOutput {
        message: format!("{} log entr(ies)", result.total),
        total: result.total,
        entries: result.entries,
        lines: result.lines,
    }))
}
