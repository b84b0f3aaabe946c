//! Durable persistence for migration tasks.
//!
//! One SQLite database with two tables: `migration_task` (one row per
//! task, updated in place) and `error_log` (append-only per-file
//! failures).

mod store;
mod task;

pub use store::TaskStore;
pub use task::{
    ErrorKind, ErrorLog, MigrationOptions, MigrationTask, NewTask, TaskState,
    DEFAULT_VERIFY_CHUNK_SIZE,
};

/// Errors surfaced by the task store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
