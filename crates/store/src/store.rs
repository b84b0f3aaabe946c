//! SQLite-backed task persistence.

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::task::{ErrorKind, ErrorLog, MigrationTask, NewTask, TaskState};
use crate::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS migration_task (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    source_folders TEXT NOT NULL,
    host TEXT NOT NULL,
    username TEXT NOT NULL,
    password TEXT NOT NULL,
    base_path TEXT NOT NULL,
    total_files INTEGER NOT NULL DEFAULT 0,
    processed_files INTEGER NOT NULL DEFAULT 0,
    failed_files INTEGER NOT NULL DEFAULT 0,
    verifying_files INTEGER NOT NULL DEFAULT 0,
    verify_failed_files INTEGER NOT NULL DEFAULT 0,
    total_bytes INTEGER NOT NULL DEFAULT 0,
    transferred_bytes INTEGER NOT NULL DEFAULT 0,
    progress REAL NOT NULL DEFAULT 0,
    options TEXT NOT NULL DEFAULT '{}',
    last_error TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_migration_task_status ON migration_task(status);
CREATE INDEX IF NOT EXISTS idx_migration_task_created ON migration_task(created_at);

CREATE TABLE IF NOT EXISTS error_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    error_msg TEXT NOT NULL,
    error_kind TEXT NOT NULL DEFAULT 'upload',
    retries INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_error_log_task ON error_log(task_id);
"#;

/// Durable store for migration tasks and their error logs.
///
/// All mutations are single statements, so concurrent workers rely on
/// SQLite's own serialization.
pub struct TaskStore {
    db: SqlitePool,
}

impl TaskStore {
    /// Opens (creating if missing) the database at `path` and ensures the
    /// schema exists.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let mut conn = db.acquire().await?;
        for stmt in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&mut *conn).await?;
        }
        drop(conn);

        debug!(path, "task store opened");
        Ok(Self { db })
    }

    /// Inserts a new pending task and returns the stored row.
    pub async fn create(&self, new: NewTask) -> Result<MigrationTask, StoreError> {
        let now = Utc::now();
        let task = MigrationTask {
            id: 0,
            task_id: Uuid::new_v4().to_string(),
            status: TaskState::Pending,
            source_folders: serde_json::to_string(&new.source_folders)?,
            host: new.host,
            username: new.username,
            password: new.password,
            base_path: new.base_path,
            total_files: 0,
            processed_files: 0,
            failed_files: 0,
            verifying_files: 0,
            verify_failed_files: 0,
            total_bytes: 0,
            transferred_bytes: 0,
            progress: 0.0,
            options: serde_json::to_string(&new.options)?,
            last_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO migration_task (
                task_id, status, source_folders, host, username, password,
                base_path, options, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.task_id)
        .bind(task.status)
        .bind(&task.source_folders)
        .bind(&task.host)
        .bind(&task.username)
        .bind(&task.password)
        .bind(&task.base_path)
        .bind(&task.options)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.db)
        .await?;

        Ok(MigrationTask {
            id: result.last_insert_rowid(),
            ..task
        })
    }

    /// Fetches a task by its opaque id.
    pub async fn get(&self, task_id: &str) -> Result<MigrationTask, StoreError> {
        sqlx::query_as::<_, MigrationTask>("SELECT * FROM migration_task WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    /// Persists every mutable field of the task, stamping `updated_at`.
    ///
    /// Rows already in `completed` or `cancelled` are never touched —
    /// those states are final. Returns whether a row was updated, so a
    /// writer that raced an external cancel can tell its write was
    /// dropped.
    pub async fn save(&self, task: &mut MigrationTask) -> Result<bool, StoreError> {
        task.updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE migration_task SET
                status = ?, total_files = ?, processed_files = ?, failed_files = ?,
                verifying_files = ?, verify_failed_files = ?, total_bytes = ?,
                transferred_bytes = ?, progress = ?, last_error = ?,
                started_at = ?, completed_at = ?, updated_at = ?
            WHERE task_id = ? AND status NOT IN ('completed', 'cancelled')
            "#,
        )
        .bind(task.status)
        .bind(task.total_files)
        .bind(task.processed_files)
        .bind(task.failed_files)
        .bind(task.verifying_files)
        .bind(task.verify_failed_files)
        .bind(task.total_bytes)
        .bind(task.transferred_bytes)
        .bind(task.progress)
        .bind(&task.last_error)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.updated_at)
        .bind(&task.task_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Checkpoints counters and totals without touching the status
    /// column, so an intra-run write can never clobber a concurrent
    /// pause or cancel.
    pub async fn save_progress(&self, task: &MigrationTask) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE migration_task SET
                total_files = ?, processed_files = ?, failed_files = ?,
                verifying_files = ?, verify_failed_files = ?, total_bytes = ?,
                transferred_bytes = ?, progress = ?, updated_at = ?
            WHERE task_id = ? AND status NOT IN ('completed', 'cancelled')
            "#,
        )
        .bind(task.total_files)
        .bind(task.processed_files)
        .bind(task.failed_files)
        .bind(task.verifying_files)
        .bind(task.verify_failed_files)
        .bind(task.total_bytes)
        .bind(task.transferred_bytes)
        .bind(task.progress)
        .bind(Utc::now())
        .bind(&task.task_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Lists tasks newest-first with the total row count for pagination.
    pub async fn list(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MigrationTask>, i64), StoreError> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM migration_task")
            .fetch_one(&self.db)
            .await?;

        let tasks = sqlx::query_as::<_, MigrationTask>(
            "SELECT * FROM migration_task ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok((tasks, total.0))
    }

    /// Appends a per-file failure row.
    pub async fn log_error(
        &self,
        task_id: &str,
        file_path: &str,
        error_msg: &str,
        kind: ErrorKind,
        retries: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO error_log (task_id, file_path, error_msg, error_kind, retries, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task_id)
        .bind(file_path)
        .bind(error_msg)
        .bind(kind)
        .bind(retries)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Returns all failure rows for a task, oldest first.
    pub async fn error_logs(&self, task_id: &str) -> Result<Vec<ErrorLog>, StoreError> {
        let logs = sqlx::query_as::<_, ErrorLog>(
            "SELECT * FROM error_log WHERE task_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.db)
        .await?;
        Ok(logs)
    }
}
