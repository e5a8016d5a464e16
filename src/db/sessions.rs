// src/db/sessions.rs
// Sync row operations for the sessions KV table and tool history.
// All functions take a borrowed connection so they compose inside
// `pool.run()` closures and `pool.run_txn()` transactions.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::session::Session;

fn to_json(session: &Session) -> rusqlite::Result<String> {
    serde_json::to_string(session).map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(e))
    })
}

fn from_json(value: &str) -> rusqlite::Result<Session> {
    serde_json::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn expires_at_str(session: &Session) -> Option<String> {
    session.expires_at().map(|t| t.to_rfc3339())
}

/// Insert a new session row. Fails on duplicate id.
pub fn insert_session_sync(conn: &Connection, session: &Session) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, value, version, updated_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session.id,
            to_json(session)?,
            session.version as i64,
            session.updated_at.to_rfc3339(),
            expires_at_str(session),
        ],
    )?;
    Ok(())
}

/// Load a session by id. The mirrored `version` column is authoritative; a
/// record whose embedded version disagrees (or regressed) indicates store
/// corruption and is surfaced to the caller.
pub fn load_session_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<Session>> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT value, version FROM sessions WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((value, version)) => {
            let mut session = from_json(&value)?;
            if session.version != version as u64 {
                let msg = format!(
                    "session '{id}' version mismatch: record={}, index={version}",
                    session.version
                );
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Integer,
                    Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
                ));
            }
            session.version = version as u64;
            Ok(Some(session))
        }
    }
}

/// Persist a mutated session, guarded by the version the caller loaded.
/// Returns false when the stored version no longer matches (lost update),
/// in which case nothing was written.
pub fn save_session_sync(
    conn: &Connection,
    session: &Session,
    expected_version: u64,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE sessions SET value = ?1, version = ?2, updated_at = ?3, expires_at = ?4
         WHERE id = ?5 AND version = ?6",
        params![
            to_json(session)?,
            session.version as i64,
            session.updated_at.to_rfc3339(),
            expires_at_str(session),
            session.id,
            expected_version as i64,
        ],
    )?;
    Ok(rows > 0)
}

/// Delete a session row. Returns whether a row existed.
pub fn delete_session_sync(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
    conn.execute("DELETE FROM tool_history WHERE session_id = ?1", params![id])?;
    Ok(rows > 0)
}

/// List all sessions, most recently updated first.
pub fn list_sessions_sync(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<Session>> {
    let mut stmt = conn.prepare(
        "SELECT value, version FROM sessions ORDER BY updated_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        let value: String = row.get(0)?;
        let version: i64 = row.get(1)?;
        let mut session = from_json(&value)?;
        session.version = version as u64;
        Ok(session)
    })?;
    rows.collect()
}

/// Ids of sessions whose expiry has passed. Uses the mirrored expires_at
/// column, so this scan never deserializes session records.
pub fn list_expired_sync(conn: &Connection, now: DateTime<Utc>) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM sessions WHERE expires_at IS NOT NULL AND expires_at <= ?1",
    )?;
    let rows = stmt.query_map(params![now.to_rfc3339()], |row| row.get(0))?;
    rows.collect()
}

/// Append a tool invocation to the session history.
pub fn append_history_sync(
    conn: &Connection,
    session_id: &str,
    tool_name: &str,
    arguments: &str,
    success: bool,
    duration_ms: u64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO tool_history (session_id, tool_name, arguments, success, duration_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            session_id,
            tool_name,
            arguments,
            success as i32,
            duration_ms as i64,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Tool history entry for display.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub tool_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub created_at: String,
}

/// Recent tool calls for a session, newest first.
pub fn history_for_session_sync(
    conn: &Connection,
    session_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT tool_name, success, duration_ms, created_at
         FROM tool_history WHERE session_id = ?1
         ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![session_id, limit as i64], |row| {
        Ok(HistoryEntry {
            tool_name: row.get(0)?,
            success: row.get::<_, i32>(1)? != 0,
            duration_ms: row.get::<_, i64>(2)? as u64,
            created_at: row.get(3)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_all_migrations;
    use std::path::PathBuf;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        run_all_migrations(&conn).expect("migrate");
        conn
    }

    #[test]
    fn insert_load_round_trip() {
        let conn = test_conn();
        let session = Session::new("s-1", PathBuf::from("/ws/s-1"), None);
        insert_session_sync(&conn, &session).expect("insert");

        let loaded = load_session_sync(&conn, "s-1").expect("load").expect("exists");
        assert_eq!(loaded.id, "s-1");
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn save_rejects_stale_version() {
        let conn = test_conn();
        let mut session = Session::new("s-1", PathBuf::from("/ws/s-1"), None);
        insert_session_sync(&conn, &session).expect("insert");

        session.version = 2;
        session.updated_at = Utc::now();
        assert!(save_session_sync(&conn, &session, 1).expect("save"));

        // A writer that loaded version 1 must not clobber version 2.
        let mut stale = session.clone();
        stale.version = 2;
        assert!(!save_session_sync(&conn, &stale, 1).expect("save"));
    }

    #[test]
    fn delete_removes_session_and_history() {
        let conn = test_conn();
        let session = Session::new("s-1", PathBuf::from("/ws/s-1"), None);
        insert_session_sync(&conn, &session).expect("insert");
        append_history_sync(&conn, "s-1", "analyze", "{}", true, 12).expect("history");

        assert!(delete_session_sync(&conn, "s-1").expect("delete"));
        assert!(load_session_sync(&conn, "s-1").expect("load").is_none());
        assert!(history_for_session_sync(&conn, "s-1", 10).expect("history").is_empty());
        assert!(!delete_session_sync(&conn, "s-1").expect("second delete"));
    }

    #[test]
    fn expired_scan_only_returns_past_ttl() {
        let conn = test_conn();
        let mut expired = Session::new("old", PathBuf::from("/ws/old"), Some(60));
        expired.updated_at = Utc::now() - chrono::Duration::hours(2);
        insert_session_sync(&conn, &expired).expect("insert");

        let fresh = Session::new("fresh", PathBuf::from("/ws/fresh"), Some(3600));
        insert_session_sync(&conn, &fresh).expect("insert");

        let no_ttl = Session::new("forever", PathBuf::from("/ws/forever"), None);
        insert_session_sync(&conn, &no_ttl).expect("insert");

        let ids = list_expired_sync(&conn, Utc::now()).expect("scan");
        assert_eq!(ids, vec!["old".to_string()]);
    }
}
