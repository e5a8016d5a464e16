// src/db/schema.rs
// Schema migrations for the session store.
//
// Migrations are numbered and applied in order based on PRAGMA user_version.
// Existing migrations are frozen; schema changes append a new entry. Session
// records themselves are self-describing JSON, so most evolution happens
// there without a migration at all.

use anyhow::Result;
use rusqlite::Connection;

/// Ordered list of migrations. Index + 1 == resulting user_version.
const MIGRATIONS: &[&str] = &[
    // v1: sessions as a key-value table. `value` is the serialized session
    // record; `version`, `updated_at`, `expires_at` are mirrored out of the
    // record so expiry scans and staleness checks never deserialize JSON.
    "CREATE TABLE IF NOT EXISTS sessions (
         id         TEXT PRIMARY KEY,
         value      TEXT NOT NULL,
         version    INTEGER NOT NULL,
         updated_at TEXT NOT NULL,
         expires_at TEXT
     );
     CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at)
         WHERE expires_at IS NOT NULL;",
    // v2: per-session tool call history.
    "CREATE TABLE IF NOT EXISTS tool_history (
         id          INTEGER PRIMARY KEY AUTOINCREMENT,
         session_id  TEXT NOT NULL,
         tool_name   TEXT NOT NULL,
         arguments   TEXT NOT NULL,
         success     INTEGER NOT NULL,
         duration_ms INTEGER NOT NULL,
         created_at  TEXT NOT NULL
     );
     CREATE INDEX IF NOT EXISTS idx_tool_history_session
         ON tool_history(session_id, id);",
];

/// Apply all pending migrations.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (i, sql) in MIGRATIONS.iter().enumerate() {
        let target = (i + 1) as i64;
        if current < target {
            conn.execute_batch(sql)?;
            conn.pragma_update(None, "user_version", target)?;
            tracing::debug!("applied schema migration v{}", target);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        run_all_migrations(&conn).expect("first run");
        run_all_migrations(&conn).expect("second run");

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .expect("user_version");
        assert_eq!(version, MIGRATIONS.len() as i64);
    }
}
