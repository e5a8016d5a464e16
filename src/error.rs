// src/error.rs
// Structured error model shared by every fallible operation.
//
// Errors are never bare strings: each carries a stable code, a category that
// drives retry policy, a severity that drives reporting, free-form context
// fields, and ordered suggestions. Classification (retryable, user-facing,
// requires-auth) is derived from category and severity, never declared.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience type alias for Result using KitError
pub type Result<T> = std::result::Result<T, KitError>;

/// Failure class. Drives retry policy and code ranges.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Policy,
    Build,
    Deploy,
    Security,
    Network,
    Timeout,
    System,
    Auth,
    Quota,
    Cancelled,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Policy => "policy",
            ErrorCategory::Build => "build",
            ErrorCategory::Deploy => "deploy",
            ErrorCategory::Security => "security",
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::System => "system",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Quota => "quota",
            ErrorCategory::Cancelled => "cancelled",
        }
    }
}

/// Reporting severity, ordered Low < Medium < High < Critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

// Stable error codes. Grouped by category; new codes are appended, never
// renumbered or reused.
pub mod codes {
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const MISSING_DEPENDENCY: &str = "MISSING_DEPENDENCY";
    pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
    pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
    pub const POLICY_BLOCKED: &str = "POLICY_BLOCKED";
    pub const PATH_ESCAPE: &str = "PATH_ESCAPE";

    pub const ANALYZE_FAILED: &str = "ANALYZE_FAILED";
    pub const DOCKERFILE_GENERATION_FAILED: &str = "DOCKERFILE_GENERATION_FAILED";
    pub const BUILD_EXECUTION_FAILED: &str = "BUILD_EXECUTION_FAILED";
    pub const TAG_FAILED: &str = "TAG_FAILED";
    pub const PUSH_FAILED: &str = "PUSH_FAILED";
    pub const SCAN_FAILED: &str = "SCAN_FAILED";
    pub const SCAN_THRESHOLD_EXCEEDED: &str = "SCAN_THRESHOLD_EXCEEDED";
    pub const MANIFEST_GENERATION_FAILED: &str = "MANIFEST_GENERATION_FAILED";
    pub const CLUSTER_UNREACHABLE: &str = "CLUSTER_UNREACHABLE";
    pub const DEPLOY_FAILED: &str = "DEPLOY_FAILED";
    pub const VERIFY_UNHEALTHY: &str = "VERIFY_UNHEALTHY";
    pub const WORKFLOW_FAILED: &str = "WORKFLOW_FAILED";

    pub const DRIVER_UNAVAILABLE: &str = "DRIVER_UNAVAILABLE";
    pub const ANALYZER_UNAVAILABLE: &str = "ANALYZER_UNAVAILABLE";
    pub const NETWORK_FAILURE: &str = "NETWORK_FAILURE";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const CANCELLED: &str = "CANCELLED";
    pub const STORE_FAILURE: &str = "STORE_FAILURE";
    pub const STORE_CORRUPT: &str = "STORE_CORRUPT";
    pub const SYSTEM_ERROR: &str = "SYSTEM_ERROR";
    pub const AUTH_REQUIRED: &str = "AUTH_REQUIRED";
    pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
}

/// Structured error carried by every fallible operation.
#[derive(Error, Debug)]
#[error("{code}: {message}")]
pub struct KitError {
    pub code: &'static str,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub context: BTreeMap<String, String>,
    pub suggestions: Vec<String>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl KitError {
    pub fn new(
        code: &'static str,
        category: ErrorCategory,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            category,
            severity,
            message: message.into(),
            context: BTreeMap::new(),
            suggestions: Vec::new(),
            cause: None,
        }
    }

    // Constructors for the common failure classes.

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            codes::INVALID_INPUT,
            ErrorCategory::Validation,
            Severity::Medium,
            message,
        )
    }

    pub fn missing_dependency(tool: &str, needs: &str) -> Self {
        Self::new(
            codes::MISSING_DEPENDENCY,
            ErrorCategory::Validation,
            Severity::Medium,
            format!("tool '{tool}' requires the result of '{needs}' which is not present"),
        )
        .with_context("tool", tool)
        .with_context("requires", needs)
        .with_suggestion(format!("run the '{needs}' tool for this session first"))
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new(
            codes::SESSION_NOT_FOUND,
            ErrorCategory::Validation,
            Severity::Medium,
            format!("session '{id}' not found"),
        )
        .with_context("session_id", id)
    }

    pub fn policy_blocked(rule_id: &str, message: impl Into<String>) -> Self {
        Self::new(
            codes::POLICY_BLOCKED,
            ErrorCategory::Policy,
            Severity::High,
            message,
        )
        .with_context("rule_id", rule_id)
    }

    pub fn build(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, ErrorCategory::Build, Severity::Medium, message)
    }

    pub fn deploy(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, ErrorCategory::Deploy, Severity::High, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(
            codes::NETWORK_FAILURE,
            ErrorCategory::Network,
            Severity::Medium,
            message,
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(codes::TIMEOUT, ErrorCategory::Timeout, Severity::Medium, message)
    }

    pub fn cancelled() -> Self {
        Self::new(
            codes::CANCELLED,
            ErrorCategory::Cancelled,
            Severity::Low,
            "operation cancelled",
        )
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(
            codes::SYSTEM_ERROR,
            ErrorCategory::System,
            Severity::High,
            message,
        )
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(
            codes::STORE_FAILURE,
            ErrorCategory::System,
            Severity::High,
            message,
        )
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(
            codes::AUTH_REQUIRED,
            ErrorCategory::Auth,
            Severity::High,
            message,
        )
    }

    // Builder-style enrichment.

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn caused_by(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    // Derived classification. Never stored, always computed.

    /// Retryable iff the failure is transient (network/timeout) or a build
    /// failure mild enough that a changed input could succeed.
    pub fn retryable(&self) -> bool {
        matches!(self.category, ErrorCategory::Network | ErrorCategory::Timeout)
            || (self.category == ErrorCategory::Build && self.severity <= Severity::Medium)
    }

    /// User-facing errors are returned in full with suggestions; everything
    /// else gets a generic message plus a trace id.
    pub fn user_facing(&self) -> bool {
        self.severity >= Severity::Medium && self.category != ErrorCategory::System
    }

    pub fn requires_auth(&self) -> bool {
        self.category == ErrorCategory::Auth
    }

    /// Delay before retry attempt `attempt` (1-based): exponential with
    /// jitter, capped, with a per-category base. Network backs off fast,
    /// quota slow.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base_ms: u64 = match self.category {
            ErrorCategory::Network => 250,
            ErrorCategory::Timeout => 1_000,
            ErrorCategory::Quota => 5_000,
            _ => 500,
        };
        let cap_ms: u64 = 30_000;
        let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
        let capped = exp.min(cap_ms);
        // Full jitter: uniform in [capped/2, capped]
        let jittered = rand::rng().random_range(capped / 2..=capped);
        Duration::from_millis(jittered)
    }

    /// Serialize to the wire `error` object carried in tool responses.
    pub fn to_wire(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code.to_string(),
            category: self.category,
            severity: self.severity,
            message: self.message.clone(),
            context: self.context.clone(),
            suggestions: self.suggestions.clone(),
            cause: self.cause.as_ref().map(|c| c.to_string()),
            retryable: self.retryable(),
            user_facing: self.user_facing(),
            requires_auth: self.requires_auth(),
        }
    }

    /// Message shown to the caller: full for user-facing errors, generic
    /// (with a trace id for log correlation) otherwise.
    pub fn to_user_string(&self, trace_id: &str) -> String {
        if self.user_facing() {
            let mut out = format!("{}: {}", self.code, self.message);
            for s in &self.suggestions {
                out.push_str("\n  hint: ");
                out.push_str(s);
            }
            out
        } else {
            format!("internal error (trace id {trace_id})")
        }
    }
}

/// Wire form of a KitError, embedded in tool responses and persisted in
/// workflow step state. Self-describing so stored errors survive field
/// additions.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ErrorPayload {
    pub code: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub retryable: bool,
    pub user_facing: bool,
    pub requires_auth: bool,
}

// Conversions from library errors. Each maps into the closest category and
// preserves the cause chain.

impl From<rusqlite::Error> for KitError {
    fn from(err: rusqlite::Error) -> Self {
        KitError::store(format!("database error: {err}")).caused_by(err)
    }
}

impl From<std::io::Error> for KitError {
    fn from(err: std::io::Error) -> Self {
        KitError::system(format!("I/O error: {err}")).caused_by(err)
    }
}

impl From<serde_json::Error> for KitError {
    fn from(err: serde_json::Error) -> Self {
        KitError::system(format!("JSON error: {err}")).caused_by(err)
    }
}

impl From<serde_yaml::Error> for KitError {
    fn from(err: serde_yaml::Error) -> Self {
        KitError::system(format!("YAML error: {err}")).caused_by(err)
    }
}

impl From<reqwest::Error> for KitError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            KitError::timeout(format!("HTTP request timed out: {err}")).caused_by(err)
        } else {
            KitError::network(format!("HTTP error: {err}")).caused_by(err)
        }
    }
}

impl From<anyhow::Error> for KitError {
    fn from(err: anyhow::Error) -> Self {
        KitError::system(format!("{err:#}"))
    }
}

impl From<tokio::task::JoinError> for KitError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            KitError::cancelled()
        } else {
            KitError::system(err.to_string()).caused_by(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_timeout_are_retryable() {
        assert!(KitError::network("conn reset").retryable());
        assert!(KitError::timeout("deadline").retryable());
    }

    #[test]
    fn mild_build_errors_are_retryable_severe_are_not() {
        let mild = KitError::build(codes::BUILD_EXECUTION_FAILED, "step failed");
        assert_eq!(mild.severity, Severity::Medium);
        assert!(mild.retryable());

        let severe = KitError::build(codes::BUILD_EXECUTION_FAILED, "daemon gone")
            .with_severity(Severity::High);
        assert!(!severe.retryable());
    }

    #[test]
    fn system_errors_are_not_user_facing() {
        let err = KitError::system("internal invariant broken");
        assert!(!err.user_facing());
        assert!(err.to_user_string("t-1").contains("t-1"));
    }

    #[test]
    fn validation_errors_are_user_facing() {
        let err = KitError::validation("bad image reference");
        assert!(err.user_facing());
        assert!(!err.retryable());
    }

    #[test]
    fn auth_requires_auth() {
        let err = KitError::auth("registry credentials rejected");
        assert!(err.requires_auth());
        assert!(!KitError::network("x").requires_auth());
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let err = KitError::network("flaky");
        let d1 = err.retry_delay(1);
        assert!(d1 >= Duration::from_millis(125) && d1 <= Duration::from_millis(250));
        // Far past the cap, delay stays within [cap/2, cap]
        let d20 = err.retry_delay(20);
        assert!(d20 >= Duration::from_millis(15_000) && d20 <= Duration::from_millis(30_000));
    }

    #[test]
    fn quota_backs_off_slower_than_network() {
        let quota = KitError::new(
            codes::QUOTA_EXCEEDED,
            ErrorCategory::Quota,
            Severity::Medium,
            "rate limited",
        );
        // Minimum possible quota delay at attempt 1 exceeds the network maximum.
        assert!(quota.retry_delay(1) >= Duration::from_millis(2_500));
    }

    #[test]
    fn wire_payload_round_trips() {
        let err = KitError::policy_blocked("no-latest-tag", "':latest' is forbidden")
            .with_suggestion("pin the base image");
        let wire = err.to_wire();
        let json = serde_json::to_string(&wire).expect("serialize");
        let back: ErrorPayload = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.code, "POLICY_BLOCKED");
        assert_eq!(back.category, ErrorCategory::Policy);
        assert!(!back.retryable);
        assert!(back.user_facing);
        assert_eq!(back.context.get("rule_id").map(String::as_str), Some("no-latest-tag"));
    }

    #[test]
    fn cause_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = KitError::build(codes::BUILD_EXECUTION_FAILED, "read failed").caused_by(io);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_wire().cause.as_deref(), Some("missing"));
    }
}
