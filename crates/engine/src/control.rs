//! Control surface consumed by external callers.
//!
//! A thin façade over the store, the status cache and the worker pool:
//! submit work, answer status queries, and apply the pause / resume /
//! cancel protocol. Holds no task state of its own.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use zimaport_status::{LiveStatus, StatusCache};
use zimaport_store::{ErrorLog, MigrationTask, NewTask, StoreError, TaskState, TaskStore};

use crate::pool::WorkerPool;
use crate::{CancelRegistry, EngineError};

pub struct MigrationControl {
    store: Arc<TaskStore>,
    status: Arc<StatusCache>,
    cancels: CancelRegistry,
    pool: Arc<WorkerPool>,
}

impl MigrationControl {
    pub fn new(
        store: Arc<TaskStore>,
        status: Arc<StatusCache>,
        cancels: CancelRegistry,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            store,
            status,
            cancels,
            pool,
        }
    }

    /// Validates and persists a new pending task, returning its id.
    pub async fn create_task(&self, new: NewTask) -> Result<String, EngineError> {
        if new.source_folders.is_empty() {
            return Err(EngineError::InvalidRequest(
                "at least one source folder is required".into(),
            ));
        }
        if new.host.trim().is_empty() {
            return Err(EngineError::InvalidRequest("host is required".into()));
        }
        if new.base_path.trim().is_empty() {
            return Err(EngineError::InvalidRequest("base path is required".into()));
        }

        let task = self.store.create(new).await?;
        info!(task = %task.task_id, "created migration task");
        Ok(task.task_id)
    }

    /// Enqueues a task for execution; waits if the queue is full.
    pub async fn submit(&self, task_id: &str) -> Result<(), EngineError> {
        self.pool.submit(task_id).await
    }

    /// Live view when the task is scheduled, durable snapshot otherwise.
    ///
    /// Cached views are overlaid with the durable row's source folders,
    /// host, base path and last error so callers always get a complete
    /// picture.
    pub async fn get_status(&self, task_id: &str) -> Result<LiveStatus, EngineError> {
        let task = self.get_task(task_id).await?;
        let folders = task.source_folder_list().unwrap_or_default();

        if let Some(mut snap) = self.status.snapshot(task_id) {
            snap.source_folders = folders;
            snap.host = task.host.clone();
            snap.base_path = task.base_path.clone();
            snap.last_error = task.last_error.clone();
            return Ok(snap);
        }

        Ok(durable_snapshot(&task, folders))
    }

    /// Pages through tasks newest-first; also returns the total count.
    pub async fn list_tasks(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MigrationTask>, i64), EngineError> {
        let limit = if limit <= 0 { 20 } else { limit };
        let offset = offset.max(0);
        Ok(self.store.list(limit, offset).await?)
    }

    /// Per-file failure rows for a task.
    pub async fn error_logs(&self, task_id: &str) -> Result<Vec<ErrorLog>, EngineError> {
        // Surface NotFound for unknown ids rather than an empty list.
        self.get_task(task_id).await?;
        Ok(self.store.error_logs(task_id).await?)
    }

    /// Cancels a task. Writes the terminal record immediately and fires
    /// the running worker's cancellation token; the worker observes one
    /// or the other and stops. A task already completed or cancelled is
    /// left untouched.
    pub async fn cancel(&self, task_id: &str) -> Result<(), EngineError> {
        let mut task = self.get_task(task_id).await?;
        if matches!(task.status, TaskState::Completed | TaskState::Cancelled) {
            debug!(task = %task_id, status = %task.status, "cancel of terminal task is a no-op");
            return Ok(());
        }

        task.status = TaskState::Cancelled;
        task.completed_at = Some(Utc::now());
        self.store.save(&mut task).await?;
        self.cancels.cancel(task_id);
        if let Some(progress) = self.status.get(task_id) {
            progress.set_state(TaskState::Cancelled);
        }

        info!(task = %task_id, "task cancelled");
        Ok(())
    }

    /// Pauses a running task. The worker parks before its next file.
    pub async fn pause(&self, task_id: &str) -> Result<(), EngineError> {
        let mut task = self.get_task(task_id).await?;
        match task.status {
            TaskState::Running => {
                task.status = TaskState::Paused;
                self.store.save(&mut task).await?;
                info!(task = %task_id, "task paused");
                Ok(())
            }
            TaskState::Paused => Ok(()),
            other => Err(EngineError::InvalidState(other)),
        }
    }

    /// Resumes a paused task; the worker's pause loop picks it up.
    pub async fn resume(&self, task_id: &str) -> Result<(), EngineError> {
        let mut task = self.get_task(task_id).await?;
        match task.status {
            TaskState::Paused => {
                task.status = TaskState::Running;
                self.store.save(&mut task).await?;
                info!(task = %task_id, "task resumed");
                Ok(())
            }
            TaskState::Running => Ok(()),
            other => Err(EngineError::InvalidState(other)),
        }
    }

    async fn get_task(&self, task_id: &str) -> Result<MigrationTask, EngineError> {
        self.store.get(task_id).await.map_err(|e| match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => other.into(),
        })
    }
}

/// Builds a status view from the durable record alone.
fn durable_snapshot(task: &MigrationTask, source_folders: Vec<String>) -> LiveStatus {
    LiveStatus {
        task_id: task.task_id.clone(),
        status: task.status,
        current_file: String::new(),
        current_file_size: 0,
        current_file_transferred: 0,
        speed: 0,
        eta: 0,
        processed_files: task.processed_files,
        total_files: task.total_files,
        failed_files: task.failed_files,
        verifying_files: task.verifying_files,
        verify_failed_files: task.verify_failed_files,
        transferred_bytes: task.transferred_bytes,
        total_bytes: task.total_bytes,
        progress: task.progress,
        source_folders,
        host: task.host.clone(),
        base_path: task.base_path.clone(),
        last_error: task.last_error.clone(),
        started_at: task.started_at,
        updated_at: task.updated_at,
    }
}
