//! Durable task model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a migration task.
///
/// `Completed`, `Failed` and `Cancelled` are terminal; a terminal row is
/// never mutated again (cancelling a failed task is the one exception).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Verifying,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Verifying => "verifying",
            TaskState::Paused => "paused",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Per-task behavior switches, persisted as JSON on the task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationOptions {
    pub overwrite_existing: bool,
    pub skip_errors: bool,
    pub preserve_times: bool,
    pub include_recycle: bool,
    pub enable_verification: bool,
    pub verify_chunk_size: i64,
}

/// Default head-compare window for post-upload verification: 1 MiB.
pub const DEFAULT_VERIFY_CHUNK_SIZE: i64 = 1024 * 1024;

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            overwrite_existing: false,
            skip_errors: true,
            preserve_times: true,
            include_recycle: false,
            enable_verification: false,
            verify_chunk_size: DEFAULT_VERIFY_CHUNK_SIZE,
        }
    }
}

/// A durable migration task row.
///
/// `source_folders` and `options` are stored as JSON text; use
/// [`source_folder_list`](Self::source_folder_list) and
/// [`parsed_options`](Self::parsed_options) to decode them. The password
/// is stored but never serialized back out.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MigrationTask {
    pub id: i64,
    pub task_id: String,
    pub status: TaskState,
    pub source_folders: String,
    pub host: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub base_path: String,
    pub total_files: i64,
    pub processed_files: i64,
    pub failed_files: i64,
    pub verifying_files: i64,
    pub verify_failed_files: i64,
    pub total_bytes: i64,
    pub transferred_bytes: i64,
    pub progress: f64,
    pub options: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationTask {
    /// Decodes the source folder list.
    pub fn source_folder_list(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.source_folders)
    }

    /// Decodes the options column, falling back to safe defaults
    /// (skip errors, preserve times, no overwrite) on malformed JSON.
    pub fn parsed_options(&self) -> MigrationOptions {
        serde_json::from_str(&self.options).unwrap_or_default()
    }
}

/// Inputs for creating a task; the store assigns id, task id and timestamps.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub source_folders: Vec<String>,
    pub host: String,
    pub username: String,
    pub password: String,
    pub base_path: String,
    pub options: MigrationOptions,
}

/// Classifies a per-file failure row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Upload,
    Verify,
}

/// One terminal per-file failure, append-only.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ErrorLog {
    pub id: i64,
    pub task_id: String,
    pub file_path: String,
    pub error_msg: String,
    pub error_kind: ErrorKind,
    pub retries: i64,
    pub created_at: DateTime<Utc>,
}
