// src/db/pool.rs
// Async connection pool using deadpool-sqlite
//
// Database access goes through `pool.run()` (plain reads/writes) or
// `pool.run_txn()` (multi-statement atomic mutations). Closures run on a
// blocking thread pool, so they never block the async runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;

use crate::error::KitError;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
///
/// SQLITE_BUSY occurs with file-based databases under write contention;
/// SQLITE_LOCKED occurs with shared-cache in-memory databases when another
/// connection holds a write lock on the same table.
fn is_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

fn kit_err_is_contention(err: &KitError) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(sqlite_err) = cause.downcast_ref::<rusqlite::Error>() {
            return is_contention(sqlite_err);
        }
        source = cause.source();
    }
    false
}

/// Retry delays for SQLite contention backoff.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_millis(2000),
];

/// Pooled session-store database with per-connection setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (shared-cache, used in tests)
    memory_uri: Option<String>,
}

enum DbStorage {
    File(PathBuf),
    InMemory,
}

impl DatabasePool {
    /// Open a pooled database at the given path and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf())).await
    }

    /// Open a pooled in-memory database.
    ///
    /// Uses a shared-cache URI so all pooled connections see the same
    /// in-memory state. Without shared cache each connection would get its
    /// own empty database.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_internal(DbStorage::InMemory).await
    }

    async fn open_internal(storage: DbStorage) -> Result<Self> {
        let (conn_str, path, memory_uri, hook) = match storage {
            DbStorage::File(p) => {
                ensure_parent_directory(&p)?;
                let s = p.to_string_lossy().to_string();
                let hook = make_file_post_create_hook(p.clone());
                (s, Some(p), None, hook)
            }
            DbStorage::InMemory => {
                let uri = format!("file:memdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
                (uri.clone(), None, Some(uri), make_memory_post_create_hook())
            }
        };

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
        };
        db_pool.run_migrations().await?;
        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests).
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool, anyhow-flavored.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;
        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure and return `Result<T, KitError>`.
    ///
    /// The preferred method for tool and store implementations; handles
    /// error conversion in one place.
    pub async fn run<F, R, E>(&self, f: F) -> Result<R, KitError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<KitError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| KitError::store(format!("failed to get connection: {e}")))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| KitError::store(format!("database task failed: {e}")))?
    }

    /// Run a closure inside a single transaction.
    ///
    /// The whole closure commits or rolls back as one unit; this is what
    /// makes session mutations atomic.
    pub async fn run_txn<F, R, E>(&self, f: F) -> Result<R, KitError>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<KitError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| KitError::store(format!("failed to get connection: {e}")))?
            .interact(move |conn| {
                let tx = conn
                    .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                    .map_err(KitError::from)?;
                let out = f(&tx).map_err(Into::into)?;
                tx.commit().map_err(KitError::from)?;
                Ok::<R, KitError>(out)
            })
            .await
            .map_err(|e| KitError::store(format!("database task failed: {e}")))?
    }

    /// Like [`run_txn`](Self::run_txn) but with retry on SQLite contention.
    ///
    /// Backs off 100ms/500ms/2s. Use for critical writes that must not be
    /// lost (session updates, step results). The closure must be `Clone`.
    pub async fn run_txn_with_retry<F, R, E>(&self, f: F) -> Result<R, KitError>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<KitError> + Send + 'static,
    {
        for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
            match self.run_txn(f.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if kit_err_is_contention(&e) => {
                    tracing::warn!(
                        "SQLite contention on attempt {}/{}, retrying in {:?}",
                        attempt + 1,
                        RETRY_DELAYS.len(),
                        delay
                    );
                    tokio::time::sleep(*delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.run_txn(f).await
    }

    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| {
            super::schema::run_all_migrations(conn)?;
            Ok(())
        })
        .await
    }
}

/// Ensure parent directory exists with restricted permissions (0o700 on Unix).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

/// post_create hook for file-based databases: PRAGMAs + 0o600 file mode.
fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to set database file permissions to 0600: {}", e);
                    }
                }

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into()))?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// post_create hook for in-memory databases (WAL does not apply).
fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into()))?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Configure a connection after creation: WAL for concurrency, foreign keys,
/// busy timeout as a 5s write-contention retry window, NORMAL sync (safe
/// with WAL).
fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_in_memory() {
        let pool = DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool");

        pool.interact(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, value, version, updated_at) VALUES (?1, ?2, 1, ?3)",
                rusqlite::params!["s-1", "{}", "2026-01-01T00:00:00Z"],
            )?;
            Ok(())
        })
        .await
        .expect("insert");

        // Verify from another pooled connection (tests shared cache)
        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .expect("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_run_txn_rolls_back_on_error() {
        let pool = DatabasePool::open_in_memory().await.expect("open");

        let result = pool
            .run_txn(|tx| {
                tx.execute(
                    "INSERT INTO sessions (id, value, version, updated_at) VALUES ('s-2', '{}', 1, 'now')",
                    [],
                )?;
                // Force a failure after the insert
                tx.execute("INSERT INTO nonexistent VALUES (1)", [])?;
                Ok::<_, rusqlite::Error>(())
            })
            .await;
        assert!(result.is_err());

        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sessions WHERE id='s-2'", [], |row| {
                    row.get(0)
                })
                .map_err(Into::into)
            })
            .await
            .expect("count");
        assert_eq!(count, 0, "transaction must roll back the insert");
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let pool = std::sync::Arc::new(DatabasePool::open_in_memory().await.expect("open"));

        let mut handles = Vec::new();
        for i in 0..10 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.run_txn_with_retry(move |tx| {
                    tx.execute(
                        "INSERT INTO sessions (id, value, version, updated_at) VALUES (?1, '{}', 1, 'now')",
                        rusqlite::params![format!("s-{i}")],
                    )?;
                    Ok::<_, rusqlite::Error>(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("insert");
        }

        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .expect("count");
        assert_eq!(count, 10);
    }
}
