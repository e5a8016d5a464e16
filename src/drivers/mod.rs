// src/drivers/mod.rs
// Narrow interfaces over external systems (docker daemon, cluster, scanner,
// analyzer). The core depends only on these traits; the concrete adapters
// own process/API details and swallow transient faults up to their retry
// budget before surfacing a classified error.

pub mod analyzer;
pub mod docker;
pub mod kube;
pub mod scanner;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorPayload, Result};

/// Result of an image build.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ImageBuilt {
    pub image_id: String,
    pub reference: String,
    pub size_bytes: u64,
    pub duration_ms: u64,
}

/// Result of an image push.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PushedImage {
    pub reference: String,
    pub digest: String,
    pub pushed_at: String,
}

/// Inspect summary for a local image.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ImageInfo {
    pub id: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub digests: Vec<String>,
}

/// Vulnerability counts by severity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SeverityCounts {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub unknown: u64,
}

impl SeverityCounts {
    pub fn total(&self) -> u64 {
        self.critical + self.high + self.medium + self.low + self.unknown
    }

    /// Findings at or above a named threshold ("critical" | "high" | ...).
    pub fn at_or_above(&self, threshold: &str) -> u64 {
        match threshold.to_lowercase().as_str() {
            "critical" => self.critical,
            "high" => self.critical + self.high,
            "medium" => self.critical + self.high + self.medium,
            _ => self.total(),
        }
    }
}

/// Scanner output.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub scanner: String,
    pub counts: SeverityCounts,
    /// Raw scanner JSON, written into the workspace by the scan tool.
    pub raw: Option<String>,
}

/// Cluster the deploy targets.
#[derive(Debug, Clone, Default)]
pub struct ClusterTarget {
    /// kubeconfig context to use; None means the current context.
    pub context: Option<String>,
    /// Provision a local dev cluster when nothing is reachable.
    pub provision_local: bool,
    /// Name for a provisioned dev cluster.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ClusterInfo {
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    pub provisioned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AppliedResources {
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PodStatus {
    pub ready: u32,
    pub total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Failure classes the analyzer assigns to a step error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    DockerfileError,
    DependencyError,
    ManifestError,
    ResourceError,
    ValidationError,
    TemplateError,
    NetworkError,
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::DockerfileError => "dockerfile_error",
            FailureCategory::DependencyError => "dependency_error",
            FailureCategory::ManifestError => "manifest_error",
            FailureCategory::ResourceError => "resource_error",
            FailureCategory::ValidationError => "validation_error",
            FailureCategory::TemplateError => "template_error",
            FailureCategory::NetworkError => "network_error",
            FailureCategory::Unknown => "unknown",
        }
    }
}

/// One workspace file the analyzer proposes to replace.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FixArtifact {
    /// Workspace-relative path.
    pub path: String,
    /// Full replacement content.
    pub content: String,
}

/// Analyzer verdict: a failure class and the fix to apply.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Remediation {
    pub category: FailureCategory,
    pub summary: String,
    #[serde(default)]
    pub artifacts: Vec<FixArtifact>,
}

/// Docker daemon surface the core depends on.
#[async_trait]
pub trait ImageDriver: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn build(
        &self,
        context_dir: &Path,
        dockerfile: &str,
        reference: &str,
        build_args: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ImageBuilt>;
    async fn tag(&self, source: &str, target: &str) -> Result<()>;
    async fn push(&self, reference: &str, cancel: &CancellationToken) -> Result<PushedImage>;
    async fn inspect(&self, reference: &str) -> Result<ImageInfo>;
    /// Remove a local tag; compensator for build/tag.
    async fn remove_tag(&self, reference: &str) -> Result<()>;
}

/// Kubernetes surface the core depends on.
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    async fn ensure_cluster(&self, target: &ClusterTarget) -> Result<ClusterInfo>;
    async fn apply_manifests(
        &self,
        dir: &Path,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<AppliedResources>;
    /// Delete previously applied resources; compensator for deploy.
    async fn delete_manifests(&self, dir: &Path, namespace: &str) -> Result<()>;
    async fn pod_status(&self, namespace: &str, selector: &str) -> Result<PodStatus>;
}

/// Vulnerability scanner surface.
#[async_trait]
pub trait ScanDriver: Send + Sync {
    async fn scan(&self, reference: &str, cancel: &CancellationToken) -> Result<ScanReport>;
}

/// Failure analyzer consumed by the fix loop. `artifacts` carries the
/// current content of the workspace files the step depends on, keyed by
/// workspace-relative path.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        step: &str,
        error: &ErrorPayload,
        artifacts: &BTreeMap<String, String>,
    ) -> Result<Remediation>;
}

/// Process-wide driver singletons, thread-safe by contract.
#[derive(Clone)]
pub struct Drivers {
    pub docker: Arc<dyn ImageDriver>,
    pub cluster: Arc<dyn ClusterDriver>,
    pub scanner: Arc<dyn ScanDriver>,
    pub analyzer: Arc<dyn Analyzer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_threshold_accumulates_downward() {
        let counts = SeverityCounts {
            critical: 1,
            high: 2,
            medium: 3,
            low: 4,
            unknown: 0,
        };
        assert_eq!(counts.at_or_above("critical"), 1);
        assert_eq!(counts.at_or_above("high"), 3);
        assert_eq!(counts.at_or_above("medium"), 6);
        assert_eq!(counts.at_or_above("low"), 10);
        assert_eq!(counts.total(), 10);
    }
}
