// src/tools/scan.rs
// Step 4: vulnerability scan of the built image.

use serde::{Deserialize, Serialize};

use crate::drivers::SeverityCounts;
use crate::error::{ErrorCategory, KitError, Result, Severity, codes};
use crate::session::Session;
use crate::utils::now_rfc3339;

use super::{ToolContext, require_result, workspace_for};

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ScanResult {
    pub reference: String,
    pub scanner: String,
    pub counts: SeverityCounts,
    pub severity_threshold: String,
    pub findings_at_threshold: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
}

pub struct ScanParams {
    /// Image to scan; defaults to the build result.
    pub reference: Option<String>,
    /// Threshold severity counted in `findings_at_threshold`.
    pub severity_threshold: String,
    /// Fail the step when findings exist at or above the threshold.
    pub fail_on_findings: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            reference: None,
            severity_threshold: "critical".to_string(),
            fail_on_findings: false,
        }
    }
}

pub async fn execute(
    ctx: &impl ToolContext,
    session: &Session,
    params: &ScanParams,
) -> Result<ScanResult> {
    let build: super::build::BuildResult = require_result(session, "scan", "build")?;
    let reference = params.reference.clone().unwrap_or(build.reference);

    let cancel = ctx.cancel();
    let report = ctx.drivers().scanner.scan(&reference, &cancel).await?;

    // Persist the raw report next to the other artifacts.
    let report_path = match &report.raw {
        Some(raw) => {
            let workspace = workspace_for(ctx, session)?;
            let name = format!(
                "reports/scan-{}.json",
                now_rfc3339().replace([':', '+'], "-")
            );
            Some(workspace.write_atomic(&name, raw)?.to_string_lossy().to_string())
        }
        None => None,
    };

    let findings = report.counts.at_or_above(&params.severity_threshold);
    let result = ScanResult {
        reference: reference.clone(),
        scanner: report.scanner,
        counts: report.counts,
        severity_threshold: params.severity_threshold.clone(),
        findings_at_threshold: findings,
        report_path,
    };

    if params.fail_on_findings && findings > 0 {
        return Err(KitError::new(
            codes::SCAN_THRESHOLD_EXCEEDED,
            ErrorCategory::Security,
            Severity::High,
            format!(
                "{findings} finding(s) at or above '{}' in {reference}",
                params.severity_threshold
            ),
        )
        .with_context("image", &reference)
        .with_suggestion("update the base image or dependencies, then rebuild"));
    }

    Ok(result)
}
