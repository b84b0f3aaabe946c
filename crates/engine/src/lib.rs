//! Migration execution engine.
//!
//! Owns the task lifecycle: a fixed worker pool consumes task ids from a
//! bounded queue, and each task is driven through scan → upload (with
//! per-file retry) → optional verification → terminal state. External
//! callers go through [`MigrationControl`].

mod appliance;
mod config;
mod control;
mod pool;
mod runner;

#[cfg(test)]
pub(crate) mod testutil;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use zimaport_appliance::ApplianceError;
use zimaport_scanner::ScanError;
use zimaport_store::{StoreError, TaskState};

pub use appliance::{Appliance, ApplianceFactory, ZimaFactory};
pub use config::EngineConfig;
pub use control::MigrationControl;
pub use pool::WorkerPool;
pub use runner::{RunnerSettings, TaskRunner};

/// Errors surfaced by the engine and its control surface.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("operation not permitted while task is {0}")]
    InvalidState(TaskState),

    #[error("cancelled")]
    Cancelled,

    #[error("upload failed after {attempts} attempts: {source}")]
    UploadExhausted {
        attempts: u32,
        #[source]
        source: ApplianceError,
    },

    #[error("verification failed: {0}")]
    VerifyFailed(String),

    #[error("worker queue is closed")]
    QueueClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Appliance(#[from] ApplianceError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Cancellation tokens for tasks currently being executed, keyed by
/// task id. The control surface fires them so an in-flight upload
/// aborts without waiting for the next per-file reload.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and tracks a fresh token for a task run.
    pub fn register(&self, task_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.inner
            .write()
            .unwrap()
            .insert(task_id.to_string(), token.clone());
        token
    }

    /// Fires the token for a running task, if any.
    pub fn cancel(&self, task_id: &str) {
        if let Some(token) = self.inner.read().unwrap().get(task_id) {
            token.cancel();
        }
    }

    pub fn remove(&self, task_id: &str) {
        self.inner.write().unwrap().remove(task_id);
    }
}
