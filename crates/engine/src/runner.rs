//! Per-task migration execution.
//!
//! A worker hands a task id to [`TaskRunner::process`], which drives the
//! whole lifecycle: running → (verifying) → completed, or failed /
//! cancelled. External state changes (pause, cancel) are observed by
//! reloading the task row before every file and through the per-task
//! cancellation token during uploads.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use zimaport_appliance::{remote_parent, ApplianceError, ProgressFn};
use zimaport_scanner::{scan_folders, WorkItem};
use zimaport_status::{LiveStatus, StatusCache, TaskProgress};
use zimaport_store::{
    ErrorKind, MigrationOptions, MigrationTask, TaskState, TaskStore, DEFAULT_VERIFY_CHUNK_SIZE,
};

use crate::appliance::{Appliance, ApplianceFactory};
use crate::{CancelRegistry, EngineError};

/// Tunables for task execution.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Upload attempts per file.
    pub max_retries: u32,
    /// Poll cadence while a task sits in `paused`.
    pub pause_poll: Duration,
    /// First retry wait; doubles per attempt.
    pub retry_backoff_base: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            pause_poll: Duration::from_millis(500),
            retry_backoff_base: Duration::from_secs(1),
        }
    }
}

/// Wait before retry `attempt` (0-based): 1 s, 2 s, 4 s, … for the
/// default base.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt)
}

/// Executes migration tasks end to end.
pub struct TaskRunner {
    store: Arc<TaskStore>,
    status: Arc<StatusCache>,
    cancels: CancelRegistry,
    factory: Arc<dyn ApplianceFactory>,
    settings: RunnerSettings,
}

impl TaskRunner {
    pub fn new(
        store: Arc<TaskStore>,
        status: Arc<StatusCache>,
        cancels: CancelRegistry,
        factory: Arc<dyn ApplianceFactory>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            status,
            cancels,
            factory,
            settings,
        }
    }

    /// Runs one task to a terminal state.
    ///
    /// A task cancelled between submit and pickup exits quietly — the
    /// cancel already wrote the terminal record.
    pub async fn process(&self, task_id: &str) -> Result<(), EngineError> {
        let task = self.store.get(task_id).await?;
        if task.status == TaskState::Cancelled {
            debug!(task = %task_id, "task already cancelled, skipping");
            return Ok(());
        }

        let cancel = self.cancels.register(task_id);
        let result = self.run(task, &cancel).await;
        self.cancels.remove(task_id);
        result
    }

    async fn run(
        &self,
        mut task: MigrationTask,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let task_id = task.task_id.clone();

        task.status = TaskState::Running;
        task.started_at = Some(Utc::now());
        if !self.store.save(&mut task).await? {
            // Cancelled between pickup and the running transition.
            debug!(task = %task_id, "task went terminal before start");
            return Ok(());
        }

        let options = task.parsed_options();
        let folders = match task.source_folder_list() {
            Ok(f) => f,
            Err(e) => {
                let err = EngineError::InvalidRequest(format!("malformed source folder list: {e}"));
                return self.fail_task(task, err).await;
            }
        };

        let client = match self
            .factory
            .connect(&task.host, &task.username, &task.password)
        {
            Ok(c) => c,
            Err(e) => return self.fail_task(task, e.into()).await,
        };
        if let Err(e) = client.login().await {
            return self.fail_task(task, e.into()).await;
        }

        let scan = {
            let folders = folders.clone();
            let base = task.base_path.clone();
            let include_recycle = options.include_recycle;
            tokio::task::spawn_blocking(move || scan_folders(&folders, &base, include_recycle))
                .await
        };
        let (items, total_bytes) = match scan {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return self.fail_task(task, e.into()).await,
            Err(e) => {
                let err = EngineError::Internal(format!("scan task aborted: {e}"));
                return self.fail_task(task, err).await;
            }
        };

        task.total_files = items.len() as i64;
        task.total_bytes = total_bytes;
        if let Err(e) = self.store.save_progress(&task).await {
            return self.fail_task(task, e.into()).await;
        }
        info!(task = %task_id, files = items.len(), total_bytes, "scan complete");

        let progress = self.status.begin(LiveStatus {
            total_files: task.total_files,
            total_bytes,
            source_folders: folders,
            host: task.host.clone(),
            base_path: task.base_path.clone(),
            started_at: task.started_at,
            ..LiveStatus::new(&task_id)
        });
        let progress_cb: ProgressFn = {
            let p = Arc::clone(&progress);
            Arc::new(move |delta| p.add_file_bytes(delta as i64))
        };

        let mut uploaded: Vec<WorkItem> = Vec::new();
        let mut last_checkpoint = Instant::now();

        for item in &items {
            let current = match self.store.get(&task_id).await {
                Ok(t) => t,
                Err(e) => return self.fail_task(task, e.into()).await,
            };
            match current.status {
                TaskState::Cancelled => {
                    info!(task = %task_id, "task cancelled");
                    progress.set_state(TaskState::Cancelled);
                    return Ok(());
                }
                TaskState::Paused => {
                    progress.set_state(TaskState::Paused);
                    if !self.wait_while_paused(&task_id, cancel).await? {
                        info!(task = %task_id, "task cancelled while paused");
                        progress.set_state(TaskState::Cancelled);
                        return Ok(());
                    }
                    progress.set_state(TaskState::Running);
                }
                _ => {}
            }

            let local = item.local_path.display().to_string();

            let parent = remote_parent(&item.remote_path);
            if let Err(e) = client.create_folder(parent).await {
                warn!(task = %task_id, folder = parent, error = %e, "remote folder creation failed");
                if !options.skip_errors {
                    return self.fail_task(task, e.into()).await;
                }
                progress.file_failed();
                self.record_file_error(&task_id, &local, &e.to_string(), ErrorKind::Upload, 0)
                    .await;
                continue;
            }

            match self
                .upload_with_retry(client.as_ref(), item, cancel, &progress, &progress_cb)
                .await
            {
                Ok(()) => {
                    progress.file_succeeded(item.size);
                    uploaded.push(item.clone());
                }
                Err(EngineError::Cancelled) => {
                    info!(task = %task_id, "task cancelled during upload");
                    progress.set_state(TaskState::Cancelled);
                    return Ok(());
                }
                Err(e) => {
                    warn!(task = %task_id, file = %local, error = %e, "upload failed");
                    if !options.skip_errors {
                        return self.fail_task(task, e).await;
                    }
                    progress.file_failed();
                    self.record_file_error(
                        &task_id,
                        &local,
                        &e.to_string(),
                        ErrorKind::Upload,
                        self.settings.max_retries as i64,
                    )
                    .await;
                    continue;
                }
            }

            if last_checkpoint.elapsed() >= Duration::from_secs(1) {
                progress.refresh_rates();
                self.sync_counters(&mut task, &progress);
                if let Err(e) = self.store.save_progress(&task).await {
                    return self.fail_task(task, e.into()).await;
                }
                last_checkpoint = Instant::now();
            }
        }

        if options.enable_verification {
            task.status = TaskState::Verifying;
            self.sync_counters(&mut task, &progress);
            match self.store.save(&mut task).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(task = %task_id, "task cancelled before verification");
                    progress.set_state(TaskState::Cancelled);
                    return Ok(());
                }
                Err(e) => return self.fail_task(task, e.into()).await,
            }
            progress.set_state(TaskState::Verifying);

            if let Err(e) = self
                .verify_uploads(client.as_ref(), &task_id, &uploaded, &options, &progress, cancel)
                .await
            {
                if matches!(e, EngineError::Cancelled) {
                    info!(task = %task_id, "task cancelled during verification");
                    progress.set_state(TaskState::Cancelled);
                    return Ok(());
                }
                return self.fail_task(task, e).await;
            }
        }

        task.status = TaskState::Completed;
        self.sync_counters(&mut task, &progress);
        task.progress = 100.0;
        task.completed_at = Some(Utc::now());
        match self.store.save(&mut task).await {
            Ok(true) => {}
            Ok(false) => {
                // A cancel slipped in after the last file; its terminal
                // record wins.
                info!(task = %task_id, "task cancelled at completion");
                progress.set_state(TaskState::Cancelled);
                return Ok(());
            }
            Err(e) => return self.fail_task(task, e.into()).await,
        }
        progress.complete();

        info!(
            task = %task_id,
            processed = task.processed_files,
            failed = task.failed_files,
            "migration completed"
        );
        Ok(())
    }

    fn sync_counters(&self, task: &mut MigrationTask, progress: &Arc<TaskProgress>) {
        let snap = progress.snapshot();
        task.processed_files = snap.processed_files;
        task.failed_files = snap.failed_files;
        task.verifying_files = snap.verifying_files;
        task.verify_failed_files = snap.verify_failed_files;
        task.transferred_bytes = snap.transferred_bytes;
        task.progress = snap.progress;
    }

    /// Polls the task row until it leaves `paused`. Returns `false` when
    /// the wait ended in cancellation.
    async fn wait_while_paused(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, EngineError> {
        info!(task = %task_id, "task paused, waiting for resume");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.settings.pause_poll) => {}
            }

            let task = self.store.get(task_id).await?;
            match task.status {
                TaskState::Paused => continue,
                TaskState::Cancelled => return Ok(false),
                TaskState::Pending => {
                    // Resume routed through pending: promote it ourselves.
                    let mut task = task;
                    task.status = TaskState::Running;
                    if !self.store.save(&mut task).await? {
                        return Ok(false);
                    }
                    return Ok(true);
                }
                _ => return Ok(true),
            }
        }
    }

    async fn upload_with_retry(
        &self,
        client: &dyn Appliance,
        item: &WorkItem,
        cancel: &CancellationToken,
        progress: &Arc<TaskProgress>,
        progress_cb: &ProgressFn,
    ) -> Result<(), EngineError> {
        let attempts = self.settings.max_retries.max(1);
        let mut last: Option<ApplianceError> = None;

        for attempt in 0..attempts {
            progress.begin_file(&item.local_path.display().to_string(), item.size);

            match client
                .upload_file(
                    cancel.clone(),
                    &item.local_path,
                    &item.remote_path,
                    Arc::clone(progress_cb),
                )
                .await
            {
                Ok(()) => return Ok(()),
                Err(ApplianceError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    if attempt + 1 < attempts {
                        let wait = backoff_delay(self.settings.retry_backoff_base, attempt);
                        warn!(
                            file = %item.local_path.display(),
                            attempt = attempt + 1,
                            max = attempts,
                            wait_secs = wait.as_secs_f64(),
                            error = %e,
                            "upload attempt failed, retrying"
                        );
                        last = Some(e);
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                            _ = tokio::time::sleep(wait) => {}
                        }
                    } else {
                        last = Some(e);
                    }
                }
            }
        }

        match last {
            Some(source) => Err(EngineError::UploadExhausted { attempts, source }),
            None => Err(EngineError::Internal("retry loop made no attempts".into())),
        }
    }

    async fn verify_uploads(
        &self,
        client: &dyn Appliance,
        task_id: &str,
        uploaded: &[WorkItem],
        options: &MigrationOptions,
        progress: &Arc<TaskProgress>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let chunk = if options.verify_chunk_size > 0 {
            options.verify_chunk_size
        } else {
            DEFAULT_VERIFY_CHUNK_SIZE
        };

        for item in uploaded {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let current = self.store.get(task_id).await?;
            if current.status == TaskState::Cancelled {
                return Err(EngineError::Cancelled);
            }

            match self.verify_one(client, item, chunk).await {
                Ok(()) => progress.verify_ok(),
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    warn!(
                        task = %task_id,
                        file = %item.local_path.display(),
                        error = %e,
                        "verification failed"
                    );
                    progress.verify_failed();
                    self.record_file_error(
                        task_id,
                        &item.local_path.display().to_string(),
                        &e.to_string(),
                        ErrorKind::Verify,
                        0,
                    )
                    .await;
                    if !options.skip_errors {
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Compares remote size against the scan-time size, then the first
    /// `chunk` bytes of both copies. Reports only — never re-uploads.
    async fn verify_one(
        &self,
        client: &dyn Appliance,
        item: &WorkItem,
        chunk: i64,
    ) -> Result<(), EngineError> {
        let info = client.get_file_info(&item.remote_path).await?;
        if info.size != item.size {
            return Err(EngineError::VerifyFailed(format!(
                "size mismatch for {}: local {}, remote {}",
                item.remote_path, item.size, info.size
            )));
        }

        let head_len = chunk.min(item.size);
        if head_len <= 0 {
            return Ok(());
        }

        let local_head = read_local_head(&item.local_path, head_len as usize).await?;
        let remote_head = client
            .download_partial(&item.remote_path, head_len as u64)
            .await?;
        if local_head != remote_head {
            return Err(EngineError::VerifyFailed(format!(
                "content mismatch in first {head_len} bytes of {}",
                item.remote_path
            )));
        }
        Ok(())
    }

    /// Marks the task failed, preserving the error string on the record,
    /// and returns the error to the worker.
    async fn fail_task(
        &self,
        mut task: MigrationTask,
        err: EngineError,
    ) -> Result<(), EngineError> {
        error!(task = %task.task_id, error = %err, "migration failed");

        task.status = TaskState::Failed;
        task.completed_at = Some(Utc::now());
        task.last_error = Some(err.to_string());
        if let Err(save_err) = self.store.save(&mut task).await {
            error!(task = %task.task_id, error = %save_err, "failed to persist task failure");
        }

        if let Some(progress) = self.status.get(&task.task_id) {
            progress.fail(&err.to_string());
        }

        Err(err)
    }

    /// Worker-boundary backstop: converts a panicked run into a failed
    /// task with a generic message.
    pub(crate) async fn fail_unexpected(&self, task_id: &str) {
        let Ok(task) = self.store.get(task_id).await else {
            return;
        };
        if task.status.is_terminal() {
            return;
        }
        let _ = self
            .fail_task(task, EngineError::Internal("unexpected worker failure".into()))
            .await;
    }

    async fn record_file_error(
        &self,
        task_id: &str,
        file_path: &str,
        message: &str,
        kind: ErrorKind,
        retries: i64,
    ) {
        if let Err(e) = self
            .store
            .log_error(task_id, file_path, message, kind, retries)
            .await
        {
            error!(task = %task_id, error = %e, "failed to append error log");
        }
    }
}

async fn read_local_head(path: &Path, len: usize) -> Result<Vec<u8>, EngineError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; len];
    let mut read = 0;
    while read < len {
        let n = file.read(&mut buf[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
    }
    buf.truncate(read);
    Ok(buf)
}
