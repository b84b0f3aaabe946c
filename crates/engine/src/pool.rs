//! Fixed-size worker pool over a bounded task queue.
//!
//! `submit` applies backpressure: it waits when the queue is full.
//! Workers are stateless between tasks; a stop request lets each worker
//! finish the task it holds before exiting. A panic inside a task run is
//! contained at the worker boundary and becomes a failed task.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::runner::TaskRunner;
use crate::EngineError;

pub struct WorkerPool {
    queue_tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `workers` consumers over a queue of `queue_capacity` ids.
    pub fn start(runner: Arc<TaskRunner>, workers: usize, queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel::<String>(queue_capacity.max(1));
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let shutdown = CancellationToken::new();

        let workers = workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&queue_rx),
                Arc::clone(&runner),
                shutdown.clone(),
            )));
        }
        info!(workers, "migration workers started");

        Self {
            queue_tx,
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    /// Enqueues a task id, waiting while the queue is full.
    pub async fn submit(&self, task_id: &str) -> Result<(), EngineError> {
        self.queue_tx
            .send(task_id.to_string())
            .await
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Signals workers to stop and waits until each has drained its
    /// current task.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = {
            let mut guard = self.handles.lock().unwrap();
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("migration workers stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    runner: Arc<TaskRunner>,
    shutdown: CancellationToken,
) {
    debug!(worker = worker_id, "worker started");

    loop {
        let task_id = {
            let mut rx = queue_rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task_id) = task_id else {
            break;
        };

        info!(worker = worker_id, task = %task_id, "processing task");

        // Child task so a panic never takes the worker down.
        let run = tokio::spawn({
            let runner = Arc::clone(&runner);
            let task_id = task_id.clone();
            async move { runner.process(&task_id).await }
        });

        match run.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(worker = worker_id, task = %task_id, error = %e, "task failed");
            }
            Err(join_err) => {
                error!(
                    worker = worker_id,
                    task = %task_id,
                    error = %join_err,
                    "task run panicked"
                );
                runner.fail_unexpected(&task_id).await;
            }
        }
    }

    debug!(worker = worker_id, "worker stopped");
}
