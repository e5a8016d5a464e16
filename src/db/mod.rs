// src/db/mod.rs
// Embedded session store: deadpool-sqlite pool, schema migrations, and the
// sync row operations used through `pool.run()` / `pool.run_txn()`.

pub mod pool;
pub mod schema;
pub mod sessions;

pub use pool::DatabasePool;
pub use sessions::{
    append_history_sync, delete_session_sync, history_for_session_sync, insert_session_sync,
    list_expired_sync, list_sessions_sync, load_session_sync, save_session_sync,
};
