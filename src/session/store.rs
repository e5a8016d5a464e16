// src/session/store.rs
// SessionStore: concurrent-safe persistence of sessions over the embedded
// key-value table, with linearizable per-id updates and atomic helpers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::db::{self, DatabasePool};
use crate::error::{ErrorCategory, KitError, Result, Severity, codes};
use crate::utils::short_id;
use crate::workspace::WorkspaceManager;

use super::{Session, StepStatus, WorkflowState};

/// How often the background sweeper scans for expired sessions and idle
/// lock entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Unheld lock entries idle longer than this are reclaimed.
const LOCK_IDLE: Duration = Duration::from_secs(600);

/// Store for session records. `update` is linearizable per session id: the
/// mutator runs against the freshly loaded record inside a single
/// transaction guarded by the stored version, so no two updaters interleave.
pub struct SessionStore {
    pool: Arc<DatabasePool>,
    locks: Arc<super::WorkflowLocks>,
    workspaces: Arc<WorkspaceManager>,
    default_ttl: Option<u64>,
}

fn map_load_err(err: KitError) -> KitError {
    // Deserialize failures and version mismatches both mean the stored
    // record can no longer be trusted.
    let lowered = err.message.to_lowercase();
    if lowered.contains("version mismatch") || lowered.contains("conversion") {
        KitError::new(
            codes::STORE_CORRUPT,
            ErrorCategory::System,
            Severity::Critical,
            err.message.clone(),
        )
    } else {
        err
    }
}

impl SessionStore {
    pub fn new(
        pool: Arc<DatabasePool>,
        workspaces: Arc<WorkspaceManager>,
        default_ttl: Option<u64>,
    ) -> Self {
        Self {
            pool,
            locks: Arc::new(super::WorkflowLocks::new()),
            workspaces,
            default_ttl,
        }
    }

    pub fn locks(&self) -> &Arc<super::WorkflowLocks> {
        &self.locks
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    /// Generate a fresh session id in the client-visible format.
    pub fn generate_id() -> String {
        format!("session-{}-{}", Utc::now().timestamp_millis(), short_id())
    }

    /// Create a session with the given id (or a generated one). The
    /// workspace directory is created first so the invariant "workspace
    /// exists whenever the session exists" holds from the start.
    pub async fn create(&self, id: Option<String>) -> Result<Session> {
        let id = id.unwrap_or_else(Self::generate_id);
        let workspace = self.workspaces.ensure(&id)?;
        let session = Session::new(&id, workspace.root().to_path_buf(), self.default_ttl);

        let to_insert = session.clone();
        self.pool
            .run_txn(move |tx| db::insert_session_sync(tx, &to_insert))
            .await
            .map_err(|e| {
                if e.message.contains("UNIQUE") {
                    KitError::validation(format!("session '{id}' already exists"))
                        .with_context("session_id", &id)
                } else {
                    e
                }
            })?;
        Ok(session)
    }

    /// Load a session; NOT_FOUND if absent.
    pub async fn get(&self, id: &str) -> Result<Session> {
        self.get_opt(id)
            .await?
            .ok_or_else(|| KitError::session_not_found(id))
    }

    pub async fn get_opt(&self, id: &str) -> Result<Option<Session>> {
        let id = id.to_string();
        self.pool
            .run(move |conn| db::load_session_sync(conn, &id))
            .await
            .map_err(map_load_err)
    }

    /// Load a session or implicitly create it for an unknown id.
    pub async fn get_or_create(&self, id: &str) -> Result<Session> {
        if let Some(session) = self.get_opt(id).await? {
            // Workspace may have been removed out-of-band; restore the invariant.
            self.workspaces.ensure(id)?;
            return Ok(session);
        }
        self.create(Some(id.to_string())).await
    }

    /// Apply a mutation inside one transaction and bump `version`.
    ///
    /// The load, mutate, and guarded save happen against the same
    /// transaction; a concurrent writer that slipped in between is detected
    /// by the version guard and surfaces as a store fault (callers that
    /// respect the workflow lock never hit it).
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<Session>
    where
        F: FnOnce(&mut Session) + Send + 'static,
    {
        let id_owned = id.to_string();
        let updated = self
            .pool
            .run_txn(move |tx| {
                let mut session = db::load_session_sync(tx, &id_owned)
                    .map_err(KitError::from)?
                    .ok_or_else(|| KitError::session_not_found(&id_owned))?;
                let expected = session.version;
                mutate(&mut session);
                session.id = id_owned.clone(); // mutators must not re-key a session
                session.version = expected + 1;
                session.updated_at = Utc::now();
                let saved = db::save_session_sync(tx, &session, expected).map_err(KitError::from)?;
                if !saved {
                    return Err(KitError::store(format!(
                        "concurrent update detected for session '{id_owned}'"
                    )));
                }
                Ok::<Session, KitError>(session)
            })
            .await
            .map_err(map_load_err)?;
        Ok(updated)
    }

    /// Delete a session and remove its workspace. Workspace removal is
    /// best-effort: a failure is logged and does not resurrect the session.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let id_owned = id.to_string();
        let existed = self
            .pool
            .run_txn(move |tx| db::delete_session_sync(tx, &id_owned))
            .await?;
        if existed {
            if let Err(e) = self.workspaces.remove(id).await {
                tracing::warn!("workspace cleanup for '{}' failed: {}", id, e);
            }
        }
        Ok(existed)
    }

    /// List sessions, most recently updated first.
    pub async fn list(&self, limit: usize) -> Result<Vec<Session>> {
        self.pool
            .run(move |conn| db::list_sessions_sync(conn, limit))
            .await
            .map_err(map_load_err)
    }

    // ------------------------------------------------------------------
    // Atomic helpers. Each is a single linearizable `update`.
    // ------------------------------------------------------------------

    /// Record a tool result under `results[tool]` - the only place results
    /// are ever written.
    pub async fn record_result(
        &self,
        id: &str,
        tool: &str,
        value: serde_json::Value,
    ) -> Result<Session> {
        let tool = tool.to_string();
        self.update(id, move |session| {
            session.results.insert(tool, value);
        })
        .await
    }

    /// Replace the workflow state wholesale.
    pub async fn put_workflow(&self, id: &str, workflow: WorkflowState) -> Result<Session> {
        self.update(id, move |session| {
            session.workflow = Some(workflow);
        })
        .await
    }

    /// Mutate the attached workflow state, if any.
    pub async fn update_workflow<F>(&self, id: &str, mutate: F) -> Result<Session>
    where
        F: FnOnce(&mut WorkflowState) + Send + 'static,
    {
        self.update(id, move |session| {
            if let Some(wf) = session.workflow.as_mut() {
                mutate(wf);
            }
        })
        .await
    }

    /// Mark a step completed and append it to the compensation log when it
    /// has a compensator, in the same atomic mutation as its result write.
    pub async fn mark_step_completed(
        &self,
        id: &str,
        step: &str,
        result: serde_json::Value,
        duration_ms: u64,
        compensatable: bool,
    ) -> Result<Session> {
        let step = step.to_string();
        self.update(id, move |session| {
            session.results.insert(step.clone(), result);
            if let Some(wf) = session.workflow.as_mut() {
                if let Some(state) = wf.step_mut(&step) {
                    state.status = StepStatus::Completed;
                    state.duration_ms = Some(duration_ms);
                    state.error = None;
                }
                if compensatable && !wf.compensation_log.contains(&step) {
                    wf.compensation_log.push(step);
                }
            }
        })
        .await
    }

    /// Mark a step failed with its structured error. No result is written.
    pub async fn mark_step_failed(
        &self,
        id: &str,
        step: &str,
        error: crate::error::ErrorPayload,
    ) -> Result<Session> {
        let step = step.to_string();
        self.update(id, move |session| {
            if let Some(wf) = session.workflow.as_mut() {
                if let Some(state) = wf.step_mut(&step) {
                    state.status = StepStatus::Failed;
                    state.error = Some(error);
                }
            }
        })
        .await
    }

    /// Set a user label.
    pub async fn set_label(&self, id: &str, key: &str, value: &str) -> Result<Session> {
        let (key, value) = (key.to_string(), value.to_string());
        self.update(id, move |session| {
            session.labels.insert(key, value);
        })
        .await
    }

    /// Increment a numeric label, returning the new value. Non-numeric
    /// labels restart at 1.
    pub async fn increment_counter(&self, id: &str, key: &str) -> Result<u64> {
        let key = key.to_string();
        let key_for_read = key.clone();
        let session = self
            .update(id, move |session| {
                let next = session
                    .labels
                    .get(&key)
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0)
                    + 1;
                session.labels.insert(key, next.to_string());
            })
            .await?;
        Ok(session
            .labels
            .get(&key_for_read)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1))
    }

    /// Append a value to a JSON array stored under `results[key]`. A
    /// missing or non-array entry becomes a fresh array.
    pub async fn append_to_list(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Session> {
        let key = key.to_string();
        self.update(id, move |session| {
            let entry = session
                .results
                .entry(key)
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            match entry.as_array_mut() {
                Some(items) => items.push(value),
                None => *entry = serde_json::Value::Array(vec![value]),
            }
        })
        .await
    }

    /// Flag a running workflow for cancellation.
    pub async fn request_cancel(&self, id: &str) -> Result<Session> {
        self.update_workflow(id, |wf| {
            wf.cancel_requested = true;
        })
        .await
    }

    /// Append a tool invocation to the history log (best-effort).
    pub async fn log_tool_call(
        &self,
        session_id: &str,
        tool_name: &str,
        arguments: &str,
        success: bool,
        duration_ms: u64,
    ) {
        let (sid, tool, args) = (
            session_id.to_string(),
            tool_name.to_string(),
            arguments.to_string(),
        );
        let result = self
            .pool
            .run(move |conn| db::append_history_sync(conn, &sid, &tool, &args, success, duration_ms))
            .await;
        if let Err(e) = result {
            tracing::debug!("tool history append failed: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Reclamation
    // ------------------------------------------------------------------

    /// Delete sessions past their TTL. A session whose workflow lock is
    /// currently held is skipped: expiry defers while a workflow runs.
    pub async fn sweep_expired(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let expired = self
            .pool
            .run(move |conn| db::list_expired_sync(conn, now))
            .await?;

        let mut reclaimed = Vec::new();
        for id in expired {
            if self.locks.is_held(&id) {
                tracing::debug!("ttl expiry deferred for '{}': workflow lock held", id);
                continue;
            }
            match self.delete(&id).await {
                Ok(true) => reclaimed.push(id),
                Ok(false) => {}
                Err(e) => tracing::warn!("ttl reclamation of '{}' failed: {}", id, e),
            }
        }
        Ok(reclaimed)
    }

    /// Spawn the background sweeper (TTL expiry + idle lock entries).
    /// Dropping the returned sender stops the loop.
    pub fn spawn_sweeper(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.sweep_expired().await {
                            Ok(reclaimed) if !reclaimed.is_empty() => {
                                tracing::info!("reclaimed {} expired sessions", reclaimed.len());
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!("session sweep failed: {}", e),
                        }
                        store.locks().sweep_idle(LOCK_IDLE);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("session sweeper stopped");
        });
        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, Arc<SessionStore>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("pool"));
        let workspaces = Arc::new(WorkspaceManager::new(dir.path().to_path_buf()));
        (dir, Arc::new(SessionStore::new(pool, workspaces, None)))
    }

    #[tokio::test]
    async fn create_then_get_returns_created_session() {
        let (_dir, store) = test_store().await;
        let created = store.create(Some("s-1".into())).await.expect("create");
        let loaded = store.get("s-1").await.expect("get");
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.version, 1);
        assert!(created.workspace_path.is_dir());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let (_dir, store) = test_store().await;
        store.create(Some("s-1".into())).await.expect("create");
        let err = store.create(Some("s-1".into())).await.expect_err("duplicate");
        assert!(err.message.contains("already exists"));
    }

    #[tokio::test]
    async fn noop_update_bumps_version_only() {
        let (_dir, store) = test_store().await;
        store.create(Some("s-1".into())).await.expect("create");
        let before = store.get("s-1").await.expect("get");
        store.update("s-1", |_s| {}).await.expect("update");
        let after = store.get("s-1").await.expect("get");
        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.results, before.results);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found_and_workspace_gone() {
        let (_dir, store) = test_store().await;
        let session = store.create(Some("s-1".into())).await.expect("create");
        assert!(store.delete("s-1").await.expect("delete"));
        let err = store.get("s-1").await.expect_err("gone");
        assert_eq!(err.code, codes::SESSION_NOT_FOUND);
        assert!(!session.workspace_path.exists());
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (_dir, store) = test_store().await;
        let a = store.get_or_create("s-x").await.expect("first");
        store
            .record_result("s-x", "analyze", serde_json::json!({"ok": true}))
            .await
            .expect("record");
        let b = store.get_or_create("s-x").await.expect("second");
        assert_eq!(a.id, b.id);
        assert!(b.result("analyze").is_some());
    }

    #[tokio::test]
    async fn concurrent_updates_all_land() {
        let (_dir, store) = test_store().await;
        store.create(Some("s-c".into())).await.expect("create");

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                // Lock-then-update, the contract every mutating path follows.
                let _guard = store.locks().acquire("s-c").await;
                store
                    .record_result("s-c", &format!("tool-{i}"), serde_json::json!(i))
                    .await
            }));
        }
        for h in handles {
            h.await.expect("join").expect("update");
        }

        let session = store.get("s-c").await.expect("get");
        assert_eq!(session.results.len(), 10);
        // 1 create + 10 updates
        assert_eq!(session.version, 11);
    }

    #[tokio::test]
    async fn counter_and_list_helpers_are_atomic() {
        let (_dir, store) = test_store().await;
        store.create(Some("s-h".into())).await.expect("create");

        assert_eq!(store.increment_counter("s-h", "retries").await.expect("inc"), 1);
        assert_eq!(store.increment_counter("s-h", "retries").await.expect("inc"), 2);

        store
            .append_to_list("s-h", "events", serde_json::json!("a"))
            .await
            .expect("append");
        let session = store
            .append_to_list("s-h", "events", serde_json::json!("b"))
            .await
            .expect("append");
        assert_eq!(
            session.result("events"),
            Some(&serde_json::json!(["a", "b"]))
        );
    }

    #[tokio::test]
    async fn sweep_skips_sessions_with_held_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("pool"));
        let workspaces = Arc::new(WorkspaceManager::new(dir.path().to_path_buf()));
        let store = Arc::new(SessionStore::new(pool, workspaces, Some(1)));

        store.create(Some("busy".into())).await.expect("create");
        store.create(Some("idle".into())).await.expect("create");

        // Age both past their TTL by rewriting the mirrored expiry column;
        // `update` always restamps updated_at, so it cannot age a session.
        let past = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        store
            .pool()
            .run(move |conn| {
                conn.execute("UPDATE sessions SET expires_at = ?1", rusqlite::params![past])
            })
            .await
            .expect("age");

        let _guard = store.locks().acquire("busy").await;
        let reclaimed = store.sweep_expired().await.expect("sweep");
        assert_eq!(reclaimed, vec!["idle".to_string()]);
        assert!(store.get("busy").await.is_ok());
    }
}
