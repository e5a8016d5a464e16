// src/mcp/requests.rs
// MCP tool request types. Serialize is derived so policy evaluation can
// flatten the validated input.

use std::collections::BTreeMap;

use rmcp::schemars;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AnalyzeRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "Path to the repository to analyze")]
    pub repo_path: String,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DockerfileRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "Override the generated base image")]
    pub base_image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BuildRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "Image name, e.g. acme/web")]
    pub image: String,
    #[schemars(description = "Image tag (default: latest)")]
    pub tag: Option<String>,
    #[schemars(description = "Docker build args")]
    pub build_args: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ScanRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "Image reference to scan (default: the build result)")]
    pub reference: Option<String>,
    #[schemars(description = "Severity threshold: critical/high/medium/low (default: critical)")]
    pub severity_threshold: Option<String>,
    #[schemars(description = "Fail when findings exist at or above the threshold")]
    pub fail_on_findings: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TagRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "Target references to apply, e.g. ghcr.io/acme/web:1.2.0")]
    pub targets: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PushRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "Reference to push (default: first tag target)")]
    pub reference: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ManifestRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "Target namespace (default: default)")]
    pub namespace: Option<String>,
    #[schemars(description = "App name (default: detected from the repo)")]
    pub app_name: Option<String>,
    #[schemars(description = "Replica count (default: 1)")]
    pub replicas: Option<u32>,
    #[schemars(description = "Environment variables for the container")]
    pub env: Option<BTreeMap<String, String>>,
    #[schemars(description = "Ingress host; omits the Ingress when unset")]
    pub ingress_host: Option<String>,
    #[schemars(description = "CPU limit (default: 500m)")]
    pub cpu_limit: Option<String>,
    #[schemars(description = "Memory limit (default: 256Mi)")]
    pub memory_limit: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ClusterRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "kubeconfig context (default: current)")]
    pub context: Option<String>,
    #[schemars(description = "Provision a local dev cluster when unreachable")]
    pub provision_local: Option<bool>,
    #[schemars(description = "Name for a provisioned dev cluster")]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DeployRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "Target namespace (default: default)")]
    pub namespace: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct VerifyRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "Readiness deadline in seconds (default: 120)")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct WorkflowRequest {
    #[schemars(description = "Session ID")]
    pub session_id: String,
    #[schemars(description = "Path to the repository")]
    pub repo_path: String,
    #[schemars(description = "Image name, e.g. acme/web")]
    pub image: String,
    #[schemars(description = "Image tag (default: latest)")]
    pub tag: Option<String>,
    #[schemars(description = "Target namespace (default: default)")]
    pub namespace: Option<String>,
    #[schemars(description = "Additional references for the tag step")]
    pub registry_targets: Option<Vec<String>>,
    #[schemars(description = "Docker build args")]
    pub build_args: Option<BTreeMap<String, String>>,
    #[schemars(description = "Override the generated base image")]
    pub base_image: Option<String>,
    #[schemars(description = "Scan severity threshold (default: critical)")]
    pub severity_threshold: Option<String>,
    #[schemars(description = "Fail the scan step on findings at/above the threshold")]
    pub fail_on_findings: Option<bool>,
    #[schemars(description = "Replica count (default: 1)")]
    pub replicas: Option<u32>,
    #[schemars(description = "Environment variables for the container")]
    pub env: Option<BTreeMap<String, String>>,
    #[schemars(description = "Ingress host")]
    pub ingress_host: Option<String>,
    #[schemars(description = "kubeconfig context")]
    pub cluster_context: Option<String>,
    #[schemars(description = "Provision a local dev cluster when unreachable")]
    pub provision_local_cluster: Option<bool>,
    #[schemars(description = "Verify deadline in seconds (default: 120)")]
    pub verify_timeout_secs: Option<u64>,
    #[schemars(description = "Compensate completed steps on failure (default: configured)")]
    pub saga: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ListSessionsRequest {
    #[schemars(description = "Max sessions to return (default: 50)")]
    pub limit: Option<usize>,
    #[schemars(description = "Keep only sessions carrying this key=value label")]
    pub label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DeleteSessionRequest {
    #[schemars(description = "Session ID to delete")]
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GetLogsRequest {
    #[schemars(description = "Minimum level: trace/debug/info/warn/error")]
    pub min_level: Option<String>,
    #[schemars(description = "RFC3339 lower bound")]
    pub since: Option<String>,
    #[schemars(description = "RFC3339 upper bound")]
    pub until: Option<String>,
    #[schemars(description = "Substring filter over message and fields")]
    pub contains: Option<String>,
    #[schemars(description = "Max entries (newest kept)")]
    pub limit: Option<usize>,
    #[schemars(description = "Output format: structured (default) or text")]
    pub format: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CancelWorkflowRequest {
    #[schemars(description = "Session whose running workflow should stop")]
    pub session_id: String,
}
