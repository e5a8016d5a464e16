//! End-to-end tests over the workflow engine and the shared tool handlers,
//! using an in-memory session store and scriptable fake drivers.


use std::collections::BTreeMap;
use std::sync::Arc;

use containerkit::drivers::{FailureCategory, FixArtifact, Remediation};
use containerkit::error::{ErrorCategory, KitError, codes};
use containerkit::mcp::handlers;
use containerkit::mcp::requests::WorkflowRequest;
use containerkit::orchestrator::{self, WorkflowOptions};
use containerkit::policy::{Action, Condition, PolicyEngine, Rule};
use containerkit::session::{StepStatus, WorkflowStatus};

use test_utils::{TestContext, write_node_repo};

fn workflow_options(repo: &str, image: &str) -> WorkflowOptions {
    WorkflowOptions {
        repo_path: repo.to_string(),
        image: image.to_string(),
        tag: "1.0".to_string(),
        namespace: "default".to_string(),
        registry_targets: vec![],
        build_args: BTreeMap::new(),
        base_image: None,
        severity_threshold: "critical".to_string(),
        fail_on_findings: false,
        replicas: 1,
        env: BTreeMap::new(),
        ingress_host: None,
        cluster_context: None,
        provision_local_cluster: false,
        verify_timeout_secs: 20,
        saga: None,
    }
}

fn workflow_request(session: &str, repo: &str, image: &str) -> WorkflowRequest {
    WorkflowRequest {
        session_id: session.to_string(),
        repo_path: repo.to_string(),
        image: image.to_string(),
        tag: Some("1.0".to_string()),
        namespace: None,
        registry_targets: None,
        build_args: None,
        base_image: None,
        severity_threshold: None,
        fail_on_findings: None,
        replicas: None,
        env: None,
        ingress_host: None,
        cluster_context: None,
        provision_local_cluster: None,
        verify_timeout_secs: Some(20),
        saga: None,
    }
}

const ALL_STEPS: [&str; 10] = [
    "analyze", "dockerfile", "build", "scan", "tag", "push", "manifest", "cluster", "deploy",
    "verify",
];

// ---------------------------------------------------------------------------
// Scenario: happy path containerize
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_workflow_completes() {
    let ctx = TestContext::new().await;
    let repo = tempfile::tempdir().expect("repo dir");
    write_node_repo(repo.path());

    let output = handlers::workflow_handler(
        &ctx,
        workflow_request("s1", &repo.path().to_string_lossy(), "acme/shop-api"),
    )
    .await
    .expect("workflow should complete");

    let report = &output.0.workflow;
    assert_eq!(report.status, WorkflowStatus::Completed);
    assert!(report.steps.iter().all(|s| s.status == StepStatus::Completed));

    // Every step's result is in the session, under the tool's name only.
    let session = ctx.store.get("s1").await.expect("session");
    for step in ALL_STEPS {
        assert!(session.result(step).is_some(), "missing result for {step}");
    }
    assert!(session.result("containerize_and_deploy").is_some());

    // Progress notifications in order 1/10 .. 10/10.
    let expected: Vec<String> = (1..=10).map(|i| format!("{i}/10")).collect();
    assert_eq!(ctx.running_progress(), expected);

    // Verify reported healthy.
    assert_eq!(session.result("verify").unwrap()["status"], "healthy");

    // The image went through build, tag and push.
    assert_eq!(ctx.docker.built.lock().unwrap().as_slice(), ["acme/shop-api:1.0"]);
    assert_eq!(ctx.docker.pushed.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Scenario: build fix loop recovers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn build_fix_loop_recovers() {
    let ctx = TestContext::new().await;
    let repo = tempfile::tempdir().expect("repo dir");
    write_node_repo(repo.path());

    // First build attempt fails with a missing system package.
    ctx.docker.build_failures.lock().unwrap().push_back(KitError::build(
        codes::BUILD_EXECUTION_FAILED,
        "gyp ERR! make: g++: not found",
    ));

    let patched = "FROM node:20-alpine\nRUN apk add --no-cache build-base python3\nWORKDIR /app\nCOPY . .\nRUN npm ci\nCMD [\"node\", \"server.js\"]\n";
    ctx.analyzer.remediations.lock().unwrap().push_back(Remediation {
        category: FailureCategory::DependencyError,
        summary: "missing build tools".to_string(),
        artifacts: vec![FixArtifact {
            path: "Dockerfile".to_string(),
            content: patched.to_string(),
        }],
    });

    let output = handlers::workflow_handler(
        &ctx,
        workflow_request("s1", &repo.path().to_string_lossy(), "acme/shop-api"),
    )
    .await
    .expect("fix loop should recover");

    assert_eq!(output.0.workflow.status, WorkflowStatus::Completed);

    let session = ctx.store.get("s1").await.expect("session");
    assert!(session.result("build").is_some());
    // The recorded dockerfile result reflects the patched content.
    assert_eq!(session.result("dockerfile").unwrap()["content"], patched);
    // The workspace file was rewritten too.
    let workspace = ctx.store.workspaces().open("s1").expect("workspace");
    assert_eq!(workspace.read_to_string("Dockerfile").expect("read"), patched);

    // One retry on the build step.
    let build_step = output
        .0
        .workflow
        .steps
        .iter()
        .find(|s| s.name == "build")
        .expect("build step");
    assert_eq!(build_step.attempts, 2);
    assert_eq!(ctx.analyzer.calls.lock().unwrap().as_slice(), ["build"]);
}

// ---------------------------------------------------------------------------
// Scenario: deploy fails past its retry budget with saga enabled
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_failure_exhausts_budget_and_compensates() {
    let ctx = TestContext::new().await;
    let repo = tempfile::tempdir().expect("repo dir");
    write_node_repo(repo.path());

    // Both deploy attempts fail (budget is 2).
    for _ in 0..2 {
        ctx.cluster.deploy_failures.lock().unwrap().push_back(KitError::deploy(
            codes::DEPLOY_FAILED,
            "error validating deployment: spec.template is invalid",
        ));
    }
    // The analyzer keeps proposing a manifest fix, so the loop retries until
    // the budget runs out.
    for _ in 0..2 {
        ctx.analyzer.remediations.lock().unwrap().push_back(Remediation {
            category: FailureCategory::ManifestError,
            summary: "template invalid".to_string(),
            artifacts: vec![FixArtifact {
                path: "manifests/deployment.yaml".to_string(),
                content: "apiVersion: apps/v1\nkind: Deployment\n".to_string(),
            }],
        });
    }

    let err = handlers::workflow_handler(
        &ctx,
        workflow_request("s1", &repo.path().to_string_lossy(), "acme/shop-api"),
    )
    .await
    .expect_err("workflow must fail");

    // Original deploy error surfaces, with the compensation log attached.
    assert_eq!(err.category, ErrorCategory::Deploy);
    assert!(err.user_facing());
    assert_eq!(
        err.context.get("workflow_status").map(String::as_str),
        Some("compensated")
    );
    assert_eq!(err.context.get("failed_step").map(String::as_str), Some("deploy"));
    let log = err.context.get("compensation_log").expect("compensation log");
    assert_eq!(log, "dockerfile,build,tag,push,manifest");

    let session = ctx.store.get("s1").await.expect("session");
    // No deploy result was recorded for the failed step.
    assert!(session.result("deploy").is_none());
    let wf = session.workflow.expect("workflow state");
    assert_eq!(wf.status, WorkflowStatus::Compensated);

    // Completed compensatable steps were rolled back...
    for name in ["dockerfile", "build", "tag", "push", "manifest"] {
        let step = wf.steps.iter().find(|s| s.name == name).expect("step");
        assert_eq!(step.status, StepStatus::Compensated, "step {name}");
    }
    // ...including the local image tag, while the remote push is retained.
    assert_eq!(
        ctx.docker.removed.lock().unwrap().as_slice(),
        ["acme/shop-api:1.0"]
    );
    // Deploy never succeeded, so nothing was deleted from the cluster.
    assert!(ctx.cluster.deleted.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Scenario: concurrent sessions are isolated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_sessions_are_isolated() {
    let ctx = Arc::new(TestContext::new().await);
    let repo = tempfile::tempdir().expect("repo dir");
    write_node_repo(repo.path());
    let repo_path = repo.path().to_string_lossy().to_string();

    let mut handles = Vec::new();
    for i in 0..8 {
        let ctx = ctx.clone();
        let repo_path = repo_path.clone();
        handles.push(tokio::spawn(async move {
            let session = format!("s-{i}");
            let image = format!("acme/app-{i}");
            let options = workflow_options(&repo_path, &image);
            let report = orchestrator::run(ctx.as_ref(), &session, options)
                .await
                .expect("run");
            (session, image, report)
        }));
    }

    for handle in handles {
        let (session_id, image, report) = handle.await.expect("join");
        assert_eq!(report.status, WorkflowStatus::Completed);

        let session = ctx.store.get(&session_id).await.expect("session");
        let build = session.result("build").expect("build result");
        // Each session only ever sees its own image.
        assert_eq!(build["reference"], format!("{image}:1.0"));
        for step in ALL_STEPS {
            assert!(session.result(step).is_some());
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario: cancellation mid-build
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_mid_build_compensates_earlier_steps() {
    let ctx = Arc::new(TestContext::new().await);
    let repo = tempfile::tempdir().expect("repo dir");
    write_node_repo(repo.path());

    ctx.docker.block_builds.store(true, std::sync::atomic::Ordering::SeqCst);

    let run_ctx = ctx.clone();
    let options = workflow_options(&repo.path().to_string_lossy(), "acme/shop-api");
    let run = tokio::spawn(async move { orchestrator::run(run_ctx.as_ref(), "s1", options).await });

    // Wait until the build step is running, then cancel.
    loop {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        if let Ok(Some(session)) = ctx.store.get_opt("s1").await {
            let running = session
                .workflow
                .as_ref()
                .and_then(|wf| wf.steps.iter().find(|s| s.name == "build"))
                .map(|s| s.status == StepStatus::Running)
                .unwrap_or(false);
            if running {
                break;
            }
        }
    }
    ctx.cancel.cancel();

    let report = run.await.expect("join").expect("report");
    assert_eq!(report.status, WorkflowStatus::Cancelled);
    assert_eq!(report.error.as_ref().map(|e| e.code.as_str()), Some("CANCELLED"));

    // Steps 1-2 ran; the dockerfile compensator removed the artifact.
    assert_eq!(report.compensation_log, vec!["dockerfile".to_string()]);
    let workspace = ctx.store.workspaces().open("s1").expect("workspace");
    assert!(!workspace.exists("Dockerfile"));

    let session = ctx.store.get("s1").await.expect("session");
    assert_eq!(session.workflow.as_ref().expect("workflow").status, WorkflowStatus::Cancelled);
    // Nothing after build produced a result.
    assert!(session.result("build").is_none());
    assert!(session.result("push").is_none());
}

// ---------------------------------------------------------------------------
// Scenario: policy blocks a :latest base image
// ---------------------------------------------------------------------------

#[tokio::test]
async fn policy_blocks_latest_base_image() {
    let policy = PolicyEngine::from_rules(vec![Rule {
        id: "no-latest-tag".to_string(),
        priority: 100,
        category: Some("dockerfile".to_string()),
        conditions: vec![Condition::Regex {
            pattern: r"FROM\s+\S+:latest\b".to_string(),
            flags: None,
            field: Some("dockerfile_content".to_string()),
        }],
        actions: vec![Action::Block(
            "Base images must be pinned; ':latest' is not reproducible.".to_string(),
        )],
    }])
    .expect("policy");
    let ctx = TestContext::with_policy(policy).await;

    let repo = tempfile::tempdir().expect("repo dir");
    write_node_repo(repo.path());

    let mut request = workflow_request("s1", &repo.path().to_string_lossy(), "acme/shop-api");
    request.base_image = Some("node:latest".to_string());
    request.saga = Some(false);

    let err = handlers::workflow_handler(&ctx, request)
        .await
        .expect_err("policy must block");
    assert_eq!(err.context.get("original_code").map(String::as_str), Some("POLICY_BLOCKED"));
    assert_eq!(err.context.get("rule_id").map(String::as_str), Some("no-latest-tag"));
    assert_eq!(err.context.get("failed_step").map(String::as_str), Some("dockerfile"));

    let session = ctx.store.get("s1").await.expect("session");
    let wf = session.workflow.as_ref().expect("workflow");
    assert_eq!(wf.status, WorkflowStatus::Failed);
    assert_eq!(wf.steps[1].status, StepStatus::Failed);
    // No dockerfile result, no workspace artifact.
    assert!(session.result("dockerfile").is_none());
    let workspace = ctx.store.workspaces().open("s1").expect("workspace");
    assert!(!workspace.exists("Dockerfile"));
    // Policy failures are fatal: the fix loop never ran.
    assert!(ctx.analyzer.calls.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Open-question decision: parallel workflows on one session id serialize
// ---------------------------------------------------------------------------

#[tokio::test]
async fn workflow_runs_serialize_per_session() {
    let ctx = Arc::new(TestContext::new().await);
    let repo = tempfile::tempdir().expect("repo dir");
    write_node_repo(repo.path());
    let repo_path = repo.path().to_string_lossy().to_string();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let ctx = ctx.clone();
        let repo_path = repo_path.clone();
        handles.push(tokio::spawn(async move {
            handlers::workflow_handler(
                ctx.as_ref(),
                workflow_request("shared", &repo_path, "acme/shop-api"),
            )
            .await
        }));
    }
    for handle in handles {
        let output = handle.await.expect("join").expect("workflow");
        assert_eq!(output.0.workflow.status, WorkflowStatus::Completed);
    }

    // Both ran to completion, one after the other: 20 "running" emissions,
    // each run's progress strictly 1/10..10/10 without interleaving.
    let progress = ctx.running_progress();
    assert_eq!(progress.len(), 20);
    let expected: Vec<String> = (1..=10).map(|i| format!("{i}/10")).collect();
    assert_eq!(&progress[..10], expected.as_slice());
    assert_eq!(&progress[10..], expected.as_slice());
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_upstream_result_is_dependency_error_without_side_effects() {
    let ctx = TestContext::new().await;

    let err = handlers::build_handler(
        &ctx,
        containerkit::mcp::requests::BuildRequest {
            session_id: "fresh".to_string(),
            image: "acme/web".to_string(),
            tag: None,
            build_args: None,
        },
    )
    .await
    .expect_err("no dockerfile yet");
    assert_eq!(err.code, codes::MISSING_DEPENDENCY);

    // The session was implicitly created, but no result was recorded.
    let session = ctx.store.get("fresh").await.expect("session");
    assert!(session.result("build").is_none());
    assert!(ctx.docker.built.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_image_reference_never_reaches_the_driver() {
    let ctx = TestContext::new().await;

    let err = handlers::build_handler(
        &ctx,
        containerkit::mcp::requests::BuildRequest {
            session_id: "s1".to_string(),
            image: "Not A Valid Image".to_string(),
            tag: None,
            build_args: None,
        },
    )
    .await
    .expect_err("invalid reference");
    assert_eq!(err.category, ErrorCategory::Validation);
    assert!(ctx.docker.built.lock().unwrap().is_empty());
}

#[tokio::test]
async fn single_steps_compose_like_the_workflow() {
    let ctx = TestContext::new().await;
    let repo = tempfile::tempdir().expect("repo dir");
    write_node_repo(repo.path());

    use containerkit::mcp::requests::*;

    let analyze = handlers::analyze_handler(
        &ctx,
        AnalyzeRequest {
            session_id: "s1".to_string(),
            repo_path: repo.path().to_string_lossy().to_string(),
        },
    )
    .await
    .expect("analyze");
    assert_eq!(analyze.0.facts.language, "node");

    handlers::dockerfile_handler(
        &ctx,
        DockerfileRequest {
            session_id: "s1".to_string(),
            base_image: None,
        },
    )
    .await
    .expect("dockerfile");

    let build = handlers::build_handler(
        &ctx,
        BuildRequest {
            session_id: "s1".to_string(),
            image: "acme/shop-api".to_string(),
            tag: Some("2.0".to_string()),
            build_args: None,
        },
    )
    .await
    .expect("build");
    assert_eq!(build.0.build.reference, "acme/shop-api:2.0");

    let session = ctx.store.get("s1").await.expect("session");
    assert!(session.result("analyze").is_some());
    assert!(session.result("dockerfile").is_some());
    assert!(session.result("build").is_some());
    // Three tool calls plus the session create: version moved with each write.
    assert!(session.version >= 4);
}

#[tokio::test]
async fn get_logs_filters_by_level_and_substring() {
    let ctx = TestContext::new().await;
    use containerkit::logbuf::{LogEntry, LogLevel};

    for (level, message) in [
        (LogLevel::Debug, "chatter"),
        (LogLevel::Info, "building acme/web:1.0"),
        (LogLevel::Error, "push failed for acme/web:1.0"),
    ] {
        ctx.logs.push(LogEntry {
            timestamp: chrono::Utc::now(),
            level,
            target: "test".to_string(),
            message: message.to_string(),
            fields: Default::default(),
        });
    }

    let result = handlers::logs_handler(
        &ctx,
        containerkit::mcp::requests::GetLogsRequest {
            min_level: Some("info".to_string()),
            since: None,
            until: None,
            contains: Some("acme/web".to_string()),
            limit: None,
            format: None,
        },
    )
    .await
    .expect("logs");
    assert_eq!(result.0.total, 2);
    assert!(result.0.entries.iter().all(|e| e.level >= LogLevel::Info));
}

#[tokio::test]
async fn delete_session_removes_results_and_workspace() {
    let ctx = TestContext::new().await;
    let repo = tempfile::tempdir().expect("repo dir");
    write_node_repo(repo.path());

    handlers::analyze_handler(
        &ctx,
        containerkit::mcp::requests::AnalyzeRequest {
            session_id: "s1".to_string(),
            repo_path: repo.path().to_string_lossy().to_string(),
        },
    )
    .await
    .expect("analyze");

    let workspace_path = ctx.store.get("s1").await.expect("session").workspace_path;
    assert!(workspace_path.is_dir());

    let deleted = handlers::delete_session_handler(
        &ctx,
        containerkit::mcp::requests::DeleteSessionRequest {
            session_id: "s1".to_string(),
        },
    )
    .await
    .expect("delete");
    assert!(deleted.0.deleted);
    assert!(!workspace_path.exists());

    let err = ctx.store.get("s1").await.expect_err("gone");
    assert_eq!(err.code, codes::SESSION_NOT_FOUND);
}
