//! Shared mocks for engine tests.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use zimaport_appliance::{ApplianceError, FileMetadata, ProgressFn};
use zimaport_status::StatusCache;
use zimaport_store::{MigrationOptions, NewTask, TaskStore};

use crate::appliance::{Appliance, ApplianceFactory};
use crate::runner::{RunnerSettings, TaskRunner};
use crate::CancelRegistry;

/// Scriptable in-memory appliance.
pub struct MockAppliance {
    pub folders: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<String>>,
    upload_attempts: AtomicU32,
    fail_remaining_uploads: AtomicU32,
    fail_every_upload: AtomicBool,
    fail_every_folder: AtomicBool,
    fail_login: AtomicBool,
    block_uploads: AtomicBool,
    panic_uploads: AtomicBool,
    upload_delay: Mutex<Duration>,
    remote_files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockAppliance {
    pub fn new() -> Self {
        Self {
            folders: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            upload_attempts: AtomicU32::new(0),
            fail_remaining_uploads: AtomicU32::new(0),
            fail_every_upload: AtomicBool::new(false),
            fail_every_folder: AtomicBool::new(false),
            fail_login: AtomicBool::new(false),
            block_uploads: AtomicBool::new(false),
            panic_uploads: AtomicBool::new(false),
            upload_delay: Mutex::new(Duration::ZERO),
            remote_files: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_login(&self) {
        self.fail_login.store(true, Ordering::SeqCst);
    }

    pub fn fail_all_uploads(&self) {
        self.fail_every_upload.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_uploads(&self, n: u32) {
        self.fail_remaining_uploads.store(n, Ordering::SeqCst);
    }

    pub fn fail_folders(&self) {
        self.fail_every_folder.store(true, Ordering::SeqCst);
    }

    /// Makes uploads hang until their cancellation token fires.
    pub fn block_uploads(&self) {
        self.block_uploads.store(true, Ordering::SeqCst);
    }

    pub fn set_panic_uploads(&self, on: bool) {
        self.panic_uploads.store(on, Ordering::SeqCst);
    }

    pub fn set_upload_delay(&self, delay: Duration) {
        *self.upload_delay.lock().unwrap() = delay;
    }

    /// Registers remote content served to `get_file_info` and
    /// `download_partial`.
    pub fn put_remote_file(&self, remote_path: &str, content: &[u8]) {
        self.remote_files
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), content.to_vec());
    }

    pub fn upload_attempt_count(&self) -> u32 {
        self.upload_attempts.load(Ordering::SeqCst)
    }
}

impl Appliance for MockAppliance {
    fn login(&self) -> Pin<Box<dyn Future<Output = Result<(), ApplianceError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_login.load(Ordering::SeqCst) {
                Err(ApplianceError::AuthFailed("mock login rejected".into()))
            } else {
                Ok(())
            }
        })
    }

    fn create_folder(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApplianceError>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            if self.fail_every_folder.load(Ordering::SeqCst) {
                return Err(ApplianceError::Api {
                    status: 403,
                    body: "mock folder failure".into(),
                });
            }
            self.folders.lock().unwrap().push(path);
            Ok(())
        })
    }

    fn upload_file(
        &self,
        cancel: CancellationToken,
        local_path: &Path,
        remote_path: &str,
        progress: ProgressFn,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApplianceError>> + Send + '_>> {
        let local = local_path.to_path_buf();
        let remote = remote_path.to_string();
        Box::pin(async move {
            self.upload_attempts.fetch_add(1, Ordering::SeqCst);
            self.uploads.lock().unwrap().push(remote);

            if self.panic_uploads.load(Ordering::SeqCst) {
                panic!("mock upload panic");
            }

            if self.block_uploads.load(Ordering::SeqCst) {
                cancel.cancelled().await;
                return Err(ApplianceError::Cancelled);
            }

            let delay = *self.upload_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ApplianceError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if self.fail_every_upload.load(Ordering::SeqCst) {
                return Err(ApplianceError::UploadFailed {
                    status: 500,
                    body: "mock upload failure".into(),
                });
            }
            if self
                .fail_remaining_uploads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ApplianceError::UploadFailed {
                    status: 500,
                    body: "mock transient failure".into(),
                });
            }

            let size = std::fs::metadata(&local).map(|m| m.len()).unwrap_or(0);
            progress(size);
            Ok(())
        })
    }

    fn get_file_info(
        &self,
        remote_path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<FileMetadata, ApplianceError>> + Send + '_>> {
        let remote = remote_path.to_string();
        Box::pin(async move {
            let files = self.remote_files.lock().unwrap();
            match files.get(&remote) {
                Some(content) => Ok(FileMetadata {
                    name: zimaport_appliance::remote_file_name(&remote).to_string(),
                    size: content.len() as i64,
                    modified: 0,
                    is_dir: false,
                    path: remote.clone(),
                }),
                None => Err(ApplianceError::NotFound(remote.clone())),
            }
        })
    }

    fn download_partial(
        &self,
        remote_path: &str,
        len: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ApplianceError>> + Send + '_>> {
        let remote = remote_path.to_string();
        Box::pin(async move {
            let files = self.remote_files.lock().unwrap();
            match files.get(&remote) {
                Some(content) => {
                    let end = (len as usize).min(content.len());
                    Ok(content[..end].to_vec())
                }
                None => Err(ApplianceError::NotFound(remote.clone())),
            }
        })
    }
}

/// Factory handing out the same mock session for every task.
pub struct MockFactory {
    appliance: Arc<MockAppliance>,
}

impl ApplianceFactory for MockFactory {
    fn connect(
        &self,
        _host: &str,
        _username: &str,
        _password: &str,
    ) -> Result<Arc<dyn Appliance>, ApplianceError> {
        Ok(Arc::clone(&self.appliance) as Arc<dyn Appliance>)
    }
}

/// Fully wired engine against a mock appliance and a scratch database.
pub struct Harness {
    pub _db_dir: TempDir,
    pub store: Arc<TaskStore>,
    pub status: Arc<StatusCache>,
    pub cancels: CancelRegistry,
    pub appliance: Arc<MockAppliance>,
    pub runner: Arc<TaskRunner>,
}

/// Test settings: production structure, millisecond waits.
pub fn fast_settings() -> RunnerSettings {
    RunnerSettings {
        max_retries: 3,
        pause_poll: Duration::from_millis(25),
        retry_backoff_base: Duration::from_millis(10),
    }
}

pub async fn harness() -> Harness {
    harness_with(fast_settings()).await
}

pub async fn harness_with(settings: RunnerSettings) -> Harness {
    let db_dir = TempDir::new().unwrap();
    let db_path = db_dir.path().join("tasks.db");
    let store = Arc::new(TaskStore::open(db_path.to_str().unwrap()).await.unwrap());
    let status = Arc::new(StatusCache::new());
    let cancels = CancelRegistry::new();
    let appliance = Arc::new(MockAppliance::new());
    let factory = Arc::new(MockFactory {
        appliance: Arc::clone(&appliance),
    });
    let runner = Arc::new(TaskRunner::new(
        Arc::clone(&store),
        Arc::clone(&status),
        cancels.clone(),
        factory,
        settings,
    ));

    Harness {
        _db_dir: db_dir,
        store,
        status,
        cancels,
        appliance,
        runner,
    }
}

/// Builds a scratch source tree with the given files.
pub fn make_tree(files: &[(&str, &[u8])]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
    dir
}

/// Creates a pending task over `src` with the given options.
pub async fn task_with_options(h: &Harness, src: &TempDir, options: MigrationOptions) -> String {
    let new = NewTask {
        source_folders: vec![src.path().to_string_lossy().into_owned()],
        host: "http://mock-appliance".into(),
        username: "admin".into(),
        password: "pw".into(),
        base_path: "/vol1".into(),
        options,
    };
    h.store.create(new).await.unwrap().task_id
}
