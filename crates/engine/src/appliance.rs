//! Appliance seam between the engine and the HTTP client.
//!
//! The engine talks to the appliance through this trait so task
//! execution stays testable with mocks; production code plugs in
//! [`ZimaClient`] via [`ZimaFactory`]. Each task gets its own session —
//! clients are never shared across tasks.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use zimaport_appliance::{ApplianceError, FileMetadata, ProgressFn, ZimaClient};

/// One authenticated session against an appliance.
pub trait Appliance: Send + Sync {
    fn login(&self) -> Pin<Box<dyn Future<Output = Result<(), ApplianceError>> + Send + '_>>;

    fn create_folder(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApplianceError>> + Send + '_>>;

    fn upload_file(
        &self,
        cancel: CancellationToken,
        local_path: &Path,
        remote_path: &str,
        progress: ProgressFn,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApplianceError>> + Send + '_>>;

    fn get_file_info(
        &self,
        remote_path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<FileMetadata, ApplianceError>> + Send + '_>>;

    fn download_partial(
        &self,
        remote_path: &str,
        len: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ApplianceError>> + Send + '_>>;
}

impl Appliance for ZimaClient {
    fn login(&self) -> Pin<Box<dyn Future<Output = Result<(), ApplianceError>> + Send + '_>> {
        Box::pin(ZimaClient::login(self))
    }

    fn create_folder(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApplianceError>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move { ZimaClient::create_folder(self, &path).await })
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
        Box::pin(async move { ZimaClient::upload_file(self, cancel, &local, &remote, progress).await })
    }

    fn get_file_info(
        &self,
        remote_path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<FileMetadata, ApplianceError>> + Send + '_>> {
        let remote = remote_path.to_string();
        Box::pin(async move { ZimaClient::get_file_info(self, &remote).await })
    }

    fn download_partial(
        &self,
        remote_path: &str,
        len: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ApplianceError>> + Send + '_>> {
        let remote = remote_path.to_string();
        Box::pin(async move { ZimaClient::download_partial(self, &remote, len).await })
    }
}

/// Builds one appliance session per task.
pub trait ApplianceFactory: Send + Sync {
    fn connect(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<Arc<dyn Appliance>, ApplianceError>;
}

/// Production factory producing [`ZimaClient`] sessions.
pub struct ZimaFactory {
    timeout: Duration,
    chunk_size: usize,
}

impl ZimaFactory {
    pub fn new(timeout: Duration, chunk_size: usize) -> Self {
        Self {
            timeout,
            chunk_size,
        }
    }
}

impl ApplianceFactory for ZimaFactory {
    fn connect(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<Arc<dyn Appliance>, ApplianceError> {
        let client = ZimaClient::new(host, username, password, self.timeout)?
            .with_chunk_size(self.chunk_size);
        Ok(Arc::new(client))
    }
}
