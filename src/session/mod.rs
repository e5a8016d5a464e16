// src/session/mod.rs
// Persistent per-client session state: the one shared mutable graph.
//
// Tools never hold references to each other; everything a downstream tool
// needs lives under `Session.results`, keyed by the producing tool's name.

mod locks;
mod store;

pub use locks::WorkflowLocks;
pub use store::SessionStore;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorPayload;

/// Persistent session record. Serialized as self-describing JSON: field
/// additions are non-breaking, removals are forbidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub workspace_path: PathBuf,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Canonical location of every tool result, keyed by tool name.
    #[serde(default)]
    pub results: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowState>,
    /// Monotonically increasing; bumped on every mutation. A regression
    /// observed on load is a store fault.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl Session {
    pub fn new(id: impl Into<String>, workspace_path: PathBuf, ttl_seconds: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workspace_path,
            labels: BTreeMap::new(),
            results: BTreeMap::new(),
            workflow: None,
            version: 1,
            created_at: now,
            updated_at: now,
            ttl_seconds,
        }
    }

    /// Absolute expiry time, if a TTL is set.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.ttl_seconds
            .map(|ttl| self.updated_at + chrono::Duration::seconds(ttl as i64))
    }

    /// Result of an upstream tool, if recorded.
    pub fn result(&self, tool: &str) -> Option<&serde_json::Value> {
        self.results.get(tool)
    }

    /// Typed view of an upstream tool result.
    pub fn typed_result<T: serde::de::DeserializeOwned>(&self, tool: &str) -> Option<T> {
        self.results
            .get(tool)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Workflow lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Compensating,
    Compensated,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Cancelled
                | WorkflowStatus::Compensated
        )
    }
}

/// Per-step lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Compensated,
}

/// State of one workflow step.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StepState {
    pub name: String,
    pub status: StepStatus,
    /// "i/N" position within the pipeline.
    pub progress: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    /// Execution attempts, including fix-loop retries.
    #[serde(default)]
    pub attempts: u32,
    /// Error recorded if this step's compensator failed during rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_error: Option<String>,
}

/// Workflow state attached to a session while (and after)
/// `containerize_and_deploy` runs.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub steps: Vec<StepState>,
    pub current_step: usize,
    #[serde(default)]
    pub cancel_requested: bool,
    /// Completed steps that have compensators, in completion order. Saga
    /// rollback walks this in reverse.
    #[serde(default)]
    pub compensation_log: Vec<String>,
    #[serde(default)]
    pub saga: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(step_names: &[&str], saga: bool) -> Self {
        let total = step_names.len();
        Self {
            workflow_id: uuid::Uuid::new_v4().to_string(),
            status: WorkflowStatus::Pending,
            steps: step_names
                .iter()
                .enumerate()
                .map(|(i, name)| StepState {
                    name: name.to_string(),
                    status: StepStatus::Pending,
                    progress: format!("{}/{}", i + 1, total),
                    message: None,
                    duration_ms: None,
                    error: None,
                    attempts: 0,
                    compensation_error: None,
                })
                .collect(),
            current_step: 0,
            cancel_requested: false,
            compensation_log: Vec::new(),
            saga,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut StepState> {
        self.steps.iter_mut().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_round_trips_through_json() {
        let mut session = Session::new("s-1", PathBuf::from("/tmp/ws/s-1"), Some(3600));
        session
            .results
            .insert("analyze".into(), serde_json::json!({"language": "node"}));
        let json = serde_json::to_string(&session).expect("serialize");
        let back: Session = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, "s-1");
        assert_eq!(back.version, 1);
        assert!(back.result("analyze").is_some());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        // Additive evolution: a record written by a newer build must load.
        let json = r#"{
            "id": "s-2",
            "workspace_path": "/tmp/ws/s-2",
            "version": 4,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-02T00:00:00Z",
            "future_field": {"nested": true}
        }"#;
        let session: Session = serde_json::from_str(json).expect("deserialize");
        assert_eq!(session.version, 4);
        assert!(session.results.is_empty());
    }

    #[test]
    fn expiry_derives_from_updated_at() {
        let session = Session::new("s-3", PathBuf::from("/tmp/ws/s-3"), Some(60));
        let expires = session.expires_at().expect("ttl set");
        assert_eq!(expires, session.updated_at + chrono::Duration::seconds(60));
        assert!(Session::new("s-4", PathBuf::from("/x"), None).expires_at().is_none());
    }

    #[test]
    fn workflow_state_progress_labels() {
        let wf = WorkflowState::new(&["analyze", "build", "deploy"], true);
        assert_eq!(wf.steps[0].progress, "1/3");
        assert_eq!(wf.steps[2].progress, "3/3");
        assert_eq!(wf.status, WorkflowStatus::Pending);
        assert!(!wf.status.is_terminal());
        assert!(WorkflowStatus::Compensated.is_terminal());
    }
}
