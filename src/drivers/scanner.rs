// src/drivers/scanner.rs
// Vulnerability scanner adapter over the trivy binary.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCategory, KitError, Result, Severity, codes};
use crate::utils::truncate;

use super::{ScanDriver, ScanReport, SeverityCounts};

pub struct TrivyScanner {
    trivy: String,
}

impl TrivyScanner {
    pub fn new(trivy: impl Into<String>) -> Self {
        Self { trivy: trivy.into() }
    }
}

/// Tally severities out of a trivy JSON report.
fn count_severities(report: &serde_json::Value) -> SeverityCounts {
    let mut counts = SeverityCounts::default();
    let results = report
        .get("Results")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for result in results {
        let vulns = result
            .get("Vulnerabilities")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for vuln in vulns {
            match vuln.get("Severity").and_then(|v| v.as_str()) {
                Some("CRITICAL") => counts.critical += 1,
                Some("HIGH") => counts.high += 1,
                Some("MEDIUM") => counts.medium += 1,
                Some("LOW") => counts.low += 1,
                _ => counts.unknown += 1,
            }
        }
    }
    counts
}

#[async_trait]
impl ScanDriver for TrivyScanner {
    async fn scan(&self, reference: &str, cancel: &CancellationToken) -> Result<ScanReport> {
        let mut cmd = Command::new(&self.trivy);
        cmd.args(["image", "--format", "json", "--quiet", reference])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(KitError::cancelled()),
            out = cmd.output() => out,
        };

        let output = match output {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Degrade rather than fail the pipeline: report nothing
                // scanned and let the caller see the scanner was absent.
                tracing::warn!("trivy not found - skipping vulnerability scan");
                return Ok(ScanReport {
                    scanner: "unavailable".to_string(),
                    counts: SeverityCounts::default(),
                    raw: None,
                });
            }
            Err(e) => return Err(KitError::system(format!("failed to spawn trivy: {e}")).caused_by(e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KitError::new(
                codes::SCAN_FAILED,
                ErrorCategory::Security,
                Severity::Medium,
                format!("trivy scan of '{reference}' failed: {}", truncate(&stderr, 500)),
            )
            .with_context("image", reference));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let report: serde_json::Value = serde_json::from_str(&stdout).map_err(|e| {
            KitError::new(
                codes::SCAN_FAILED,
                ErrorCategory::Security,
                Severity::Medium,
                format!("trivy produced unparseable output: {e}"),
            )
        })?;

        Ok(ScanReport {
            scanner: "trivy".to_string(),
            counts: count_severities(&report),
            raw: Some(stdout),
        })
    }
}
