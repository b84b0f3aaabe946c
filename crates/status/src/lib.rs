//! In-memory live telemetry for running migrations.
//!
//! Each scheduled task gets a [`TaskProgress`] handle in the
//! [`StatusCache`]. The migration engine is the only writer while the
//! task runs; status queries read atomic snapshots. Entries for tasks
//! that finished long ago can be swept to bound memory.

mod speed;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use zimaport_store::TaskState;

pub use speed::SpeedCalculator;

/// Point-in-time view of a task: durable counters plus transient
/// telemetry (current file, speed, ETA).
#[derive(Debug, Clone, Serialize)]
pub struct LiveStatus {
    pub task_id: String,
    pub status: TaskState,
    pub current_file: String,
    pub current_file_size: i64,
    pub current_file_transferred: i64,
    /// Bytes per second over the recent window.
    pub speed: i64,
    /// Estimated seconds to completion; 0 when unknown.
    pub eta: i64,
    pub processed_files: i64,
    pub total_files: i64,
    pub failed_files: i64,
    pub verifying_files: i64,
    pub verify_failed_files: i64,
    pub transferred_bytes: i64,
    pub total_bytes: i64,
    /// Percentage in [0, 100].
    pub progress: f64,
    pub source_folders: Vec<String>,
    pub host: String,
    pub base_path: String,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl LiveStatus {
    /// A zeroed status for a freshly scheduled task.
    pub fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskState::Running,
            current_file: String::new(),
            current_file_size: 0,
            current_file_transferred: 0,
            speed: 0,
            eta: 0,
            processed_files: 0,
            total_files: 0,
            failed_files: 0,
            verifying_files: 0,
            verify_failed_files: 0,
            transferred_bytes: 0,
            total_bytes: 0,
            progress: 0.0,
            source_folders: Vec::new(),
            host: String::new(),
            base_path: String::new(),
            last_error: None,
            started_at: Some(Utc::now()),
            updated_at: Utc::now(),
        }
    }
}

/// Writer handle for one task's live telemetry.
///
/// Mutators take `&self`; readers always get a whole snapshot, never a
/// torn view. The upload progress callback feeds
/// [`add_file_bytes`](Self::add_file_bytes) from the producer's context
/// while the engine reads snapshots from another.
pub struct TaskProgress {
    inner: RwLock<LiveStatus>,
    speed: SpeedCalculator,
}

impl TaskProgress {
    pub fn new(seed: LiveStatus) -> Self {
        Self {
            inner: RwLock::new(seed),
            speed: SpeedCalculator::new(),
        }
    }

    /// Clones the current view.
    pub fn snapshot(&self) -> LiveStatus {
        self.inner.read().unwrap().clone()
    }

    pub fn state(&self) -> TaskState {
        self.inner.read().unwrap().status
    }

    pub fn set_state(&self, state: TaskState) {
        let mut s = self.inner.write().unwrap();
        s.status = state;
        s.updated_at = Utc::now();
    }

    /// Marks a file as the one currently transferring. Also called before
    /// each retry attempt so the per-file byte counter restarts.
    pub fn begin_file(&self, path: &str, size: i64) {
        let mut s = self.inner.write().unwrap();
        s.current_file = path.to_string();
        s.current_file_size = size;
        s.current_file_transferred = 0;
        s.updated_at = Utc::now();
    }

    /// Records bytes leaving the upload producer for the current file.
    pub fn add_file_bytes(&self, delta: i64) {
        self.speed.add_sample(delta);
        let mut s = self.inner.write().unwrap();
        s.current_file_transferred += delta;
    }

    /// Counts a finished upload into the task totals.
    pub fn file_succeeded(&self, size: i64) {
        let mut s = self.inner.write().unwrap();
        s.processed_files += 1;
        s.transferred_bytes += size;
        s.current_file_transferred = size;
        if s.total_bytes > 0 {
            s.progress = s.transferred_bytes as f64 / s.total_bytes as f64 * 100.0;
        }
        s.updated_at = Utc::now();
    }

    pub fn file_failed(&self) {
        let mut s = self.inner.write().unwrap();
        s.failed_files += 1;
        s.updated_at = Utc::now();
    }

    pub fn verify_ok(&self) {
        let mut s = self.inner.write().unwrap();
        s.verifying_files += 1;
        s.updated_at = Utc::now();
    }

    pub fn verify_failed(&self) {
        let mut s = self.inner.write().unwrap();
        s.verify_failed_files += 1;
        s.updated_at = Utc::now();
    }

    /// Recomputes speed and ETA from the sample window. Called at the
    /// engine's throttled checkpoints.
    pub fn refresh_rates(&self) {
        let bps = self.speed.bytes_per_second() as i64;
        let mut s = self.inner.write().unwrap();
        s.speed = bps;
        let remaining = s.total_bytes - s.transferred_bytes - s.current_file_transferred;
        s.eta = self.speed.eta_seconds(remaining);
        s.updated_at = Utc::now();
    }

    /// Final success publish: completed, 100%.
    pub fn complete(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = TaskState::Completed;
        s.progress = 100.0;
        s.speed = 0;
        s.eta = 0;
        s.current_file.clear();
        s.updated_at = Utc::now();
    }

    /// Final failure publish with the terminal error.
    pub fn fail(&self, error: &str) {
        let mut s = self.inner.write().unwrap();
        s.status = TaskState::Failed;
        s.last_error = Some(error.to_string());
        s.speed = 0;
        s.eta = 0;
        s.updated_at = Utc::now();
    }
}

/// Concurrent map of task id to live telemetry.
pub struct StatusCache {
    inner: RwLock<HashMap<String, Arc<TaskProgress>>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) the telemetry handle for a task.
    pub fn begin(&self, seed: LiveStatus) -> Arc<TaskProgress> {
        let progress = Arc::new(TaskProgress::new(seed.clone()));
        self.inner
            .write()
            .unwrap()
            .insert(seed.task_id, Arc::clone(&progress));
        progress
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<TaskProgress>> {
        self.inner.read().unwrap().get(task_id).cloned()
    }

    /// Snapshot of a task's live view, if one exists.
    pub fn snapshot(&self, task_id: &str) -> Option<LiveStatus> {
        self.get(task_id).map(|p| p.snapshot())
    }

    pub fn remove(&self, task_id: &str) {
        self.inner.write().unwrap().remove(task_id);
    }

    /// Drops entries for terminal tasks whose last update is older than
    /// `horizon`, so long-lived processes don't accumulate dead rows.
    pub fn sweep_terminal(&self, horizon: Duration) {
        let cutoff = Utc::now() - horizon;
        let mut map = self.inner.write().unwrap();
        map.retain(|_, progress| {
            let snap = progress.snapshot();
            !(snap.status.is_terminal() && snap.updated_at < cutoff)
        });
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}
