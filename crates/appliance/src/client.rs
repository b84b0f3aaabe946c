//! Appliance HTTP client.
//!
//! Bound to one `(host, username, password)` triple. Login is lazy: any
//! operation acquires the bearer token on first use and reuses it. The
//! appliance expects the raw token in `Authorization` (no `Bearer`
//! prefix).
//!
//! Three underlying HTTP clients with different timeout policies:
//! 30 s for auxiliary calls, none for uploads (they can take hours),
//! 60 s for verification downloads.

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{multipart, Body, StatusCode};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::{FileListResponse, FileMetadata, LoginResponse, StorageDevice};
use crate::{remote_file_name, remote_parent, ApplianceError, ProgressFn};

/// Read-buffer size for the streaming upload producer.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Stateful client for one appliance.
pub struct ZimaClient {
    host: String,
    username: String,
    password: String,
    token: RwLock<String>,
    http: reqwest::Client,
    upload: reqwest::Client,
    download: reqwest::Client,
    chunk_size: usize,
}

impl ZimaClient {
    /// Creates a client; `timeout` applies to auxiliary calls only.
    pub fn new(
        host: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, ApplianceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let upload = reqwest::Client::builder().build()?;
        let download = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            token: RwLock::new(String::new()),
            http,
            upload,
            download,
            chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
        })
    }

    /// Overrides the upload read-buffer size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size > 0 {
            self.chunk_size = chunk_size;
        }
        self
    }

    /// The current bearer token; empty before the first login.
    pub fn token(&self) -> String {
        self.token.read().unwrap().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    async fn ensure_token(&self) -> Result<String, ApplianceError> {
        {
            let token = self.token.read().unwrap();
            if !token.is_empty() {
                return Ok(token.clone());
            }
        }
        self.login().await?;
        Ok(self.token.read().unwrap().clone())
    }

    /// Authenticates and stores the bearer token.
    pub async fn login(&self) -> Result<(), ApplianceError> {
        let resp = self
            .http
            .post(self.url("/v1/users/login"))
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if status != StatusCode::OK {
            return Err(ApplianceError::AuthFailed(format!(
                "login failed with status {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body),
            )));
        }

        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        let token = parsed
            .resolve_token()
            .ok_or_else(|| ApplianceError::AuthFailed("no token in login response".into()))?;
        *self.token.write().unwrap() = token.to_string();

        info!(host = %self.host, "logged in to appliance");
        Ok(())
    }

    /// Verifies the credentials work.
    pub async fn test_connection(&self) -> Result<(), ApplianceError> {
        self.login().await
    }

    /// Creates a remote folder. Repeated calls succeed: 409 and the
    /// appliance's assorted "already exists" replies all count as success.
    pub async fn create_folder(&self, path: &str) -> Result<(), ApplianceError> {
        let token = self.ensure_token().await?;
        let resp = self
            .http
            .post(self.url("/v2_1/files/folder"))
            .header("Authorization", token)
            .json(&serde_json::json!({ "path": path }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            debug!(path, "folder created or already exists");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() && folder_exists_reply(&body) {
            debug!(path, "folder already exists");
            return Ok(());
        }

        Err(ApplianceError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// Streams a local file to the appliance as multipart form data.
    ///
    /// The body is produced chunk by chunk from the file, never fully
    /// buffered; `progress` receives each chunk's size as it leaves the
    /// producer. Cancellation is observed between reads and aborts the
    /// in-flight request. No overall timeout applies.
    pub async fn upload_file(
        &self,
        cancel: CancellationToken,
        local_path: &Path,
        remote_path: &str,
        progress: ProgressFn,
    ) -> Result<(), ApplianceError> {
        let token = self.ensure_token().await?;

        let file = tokio::fs::File::open(local_path).await?;
        let meta = file.metadata().await?;
        let size = meta.len();
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ApplianceError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "source path has no file name",
                ))
            })?;

        let body = upload_body(file, self.chunk_size, cancel.clone(), progress);
        let part = multipart::Part::stream_with_length(body, size).file_name(file_name.clone());
        let form = multipart::Form::new()
            .text("path", remote_parent(remote_path).to_string())
            .part("file", part)
            .text("modTime", format!("{file_name}:{mtime}"));

        let request = self
            .upload
            .post(self.url("/v2_1/files/file/uploadV2"))
            .header("Authorization", token)
            .multipart(form)
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ApplianceError::Cancelled),
            r = request => match r {
                Ok(resp) => resp,
                Err(e) => {
                    if cancel.is_cancelled() {
                        return Err(ApplianceError::Cancelled);
                    }
                    return Err(ApplianceError::Connection(e));
                }
            },
        };

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApplianceError::UploadFailed {
                status: status.as_u16(),
                body,
            });
        }

        debug!(local = %local_path.display(), remote = remote_path, "file uploaded");
        Ok(())
    }

    /// Looks a file up by listing its parent directory.
    pub async fn get_file_info(&self, remote_path: &str) -> Result<FileMetadata, ApplianceError> {
        let token = self.ensure_token().await?;
        let parent = remote_parent(remote_path);
        let name = remote_file_name(remote_path);

        let url = format!(
            "{}/v2_1/files/file?path={}&index=0&size=10000&sfz=true&sort=name&direction=asc",
            self.host,
            utf8_percent_encode(parent, NON_ALPHANUMERIC),
        );
        let resp = self
            .http
            .get(&url)
            .header("Authorization", token)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if status != StatusCode::OK {
            return Err(ApplianceError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let listing: FileListResponse = serde_json::from_slice(&body)?;
        listing
            .content
            .into_iter()
            .find(|f| f.name == name)
            .ok_or_else(|| ApplianceError::NotFound(remote_path.to_string()))
    }

    /// Downloads the first `len` bytes of a remote file.
    ///
    /// Sends a `Range` header; if the appliance ignores it and replies
    /// with the full content, the result is truncated to `len`.
    pub async fn download_partial(
        &self,
        remote_path: &str,
        len: u64,
    ) -> Result<Vec<u8>, ApplianceError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let token = self.ensure_token().await?;

        let url = format!(
            "{}/v3/file?token={}&files={}&action=download",
            self.host,
            token,
            utf8_percent_encode(remote_path, NON_ALPHANUMERIC),
        );
        let resp = self
            .download
            .get(&url)
            .header("Range", format!("bytes=0-{}", len - 1))
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApplianceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let mut data = resp.bytes().await?.to_vec();
        if data.len() as u64 > len {
            data.truncate(len as usize);
        }
        Ok(data)
    }

    /// Lists the appliance's storage devices.
    pub async fn list_storages(&self) -> Result<Vec<StorageDevice>, ApplianceError> {
        let token = self.ensure_token().await?;
        let resp = self
            .http
            .get(self.url("/v2/local_storage/storages"))
            .header("Authorization", token)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if status != StatusCode::OK {
            return Err(ApplianceError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

/// True when a 4xx folder-create reply actually means "already there".
fn folder_exists_reply(body: &str) -> bool {
    const KNOWN: [&str; 3] = [
        "folder already exists",
        "directory already exists",
        "path already exist",
    ];

    let trimmed = body.trim();
    if trimmed.is_empty() || KNOWN.contains(&trimmed) {
        return true;
    }
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = v.get("message").and_then(|m| m.as_str()) {
            return KNOWN.contains(&msg);
        }
    }
    false
}

struct UploadProducer {
    file: tokio::fs::File,
    chunk_size: usize,
    cancel: CancellationToken,
    progress: ProgressFn,
}

/// Builds the streaming request body. Each poll reads one chunk from the
/// file, checks for cancellation first, and reports the chunk size to
/// the progress callback. Backpressure comes from the HTTP consumer
/// polling the stream.
fn upload_body(
    file: tokio::fs::File,
    chunk_size: usize,
    cancel: CancellationToken,
    progress: ProgressFn,
) -> Body {
    let producer = UploadProducer {
        file,
        chunk_size,
        cancel,
        progress,
    };
    let stream = futures_util::stream::try_unfold(producer, |mut p| async move {
        if p.cancel.is_cancelled() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "upload cancelled",
            ));
        }
        let mut buf = vec![0u8; p.chunk_size];
        let n = p.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        (p.progress)(n as u64);
        Ok(Some((buf, p)))
    });
    Body::wrap_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    const LOGIN_OK: &str = r#"{"success":200,"data":{"token":"tok-1"}}"#;

    fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }

    async fn read_http_request(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 8192];

        let header_end = loop {
            let n = stream.read(&mut tmp).await.unwrap_or(0);
            if n == 0 {
                return buf;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let n = stream.read(&mut tmp).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
        }
        buf
    }

    struct MockServer {
        url: String,
        requests: Arc<Mutex<Vec<Vec<u8>>>>,
        handle: tokio::task::JoinHandle<()>,
    }

    impl MockServer {
        /// Serves one canned `(status, body)` per incoming connection,
        /// recording each raw request.
        async fn start(responses: Vec<(u16, String)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let url = format!("http://127.0.0.1:{port}");
            let requests = Arc::new(Mutex::new(Vec::new()));
            let recorded = Arc::clone(&requests);

            let handle = tokio::spawn(async move {
                for (status, body) in responses {
                    let Ok((mut stream, _)) = listener.accept().await else {
                        break;
                    };
                    let req = read_http_request(&mut stream).await;
                    recorded.lock().unwrap().push(req);

                    let resp = format!(
                        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(resp.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
            });

            Self {
                url,
                requests,
                handle,
            }
        }

        fn request_text(&self, index: usize) -> String {
            let reqs = self.requests.lock().unwrap();
            String::from_utf8_lossy(&reqs[index]).into_owned()
        }
    }

    impl Drop for MockServer {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    fn client_for(server: &MockServer) -> ZimaClient {
        ZimaClient::new(&server.url, "admin", "pw", Duration::from_secs(5)).unwrap()
    }

    fn noop_progress() -> ProgressFn {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn login_with_plain_token() {
        let server = MockServer::start(vec![(200, LOGIN_OK.into())]).await;
        let client = client_for(&server);
        client.login().await.unwrap();
        assert_eq!(client.token(), "tok-1");

        let req = server.request_text(0);
        assert!(req.starts_with("POST /v1/users/login"));
        assert!(req.contains(r#""username":"admin""#));
    }

    #[tokio::test]
    async fn login_with_access_token_object() {
        let body = r#"{"data":{"token":{"access_token":"acc","refresh_token":"ref","expires_at":0}}}"#;
        let server = MockServer::start(vec![(200, body.into())]).await;
        let client = client_for(&server);
        client.login().await.unwrap();
        assert_eq!(client.token(), "acc");
    }

    #[tokio::test]
    async fn login_with_refresh_token_only() {
        let body = r#"{"data":{"token":{"refresh_token":"ref"}}}"#;
        let server = MockServer::start(vec![(200, body.into())]).await;
        let client = client_for(&server);
        client.login().await.unwrap();
        assert_eq!(client.token(), "ref");
    }

    #[tokio::test]
    async fn login_with_top_level_token() {
        let server = MockServer::start(vec![(200, r#"{"token":"top"}"#.into())]).await;
        let client = client_for(&server);
        client.login().await.unwrap();
        assert_eq!(client.token(), "top");
    }

    #[tokio::test]
    async fn login_rejected_is_auth_failed() {
        let server = MockServer::start(vec![(401, r#"{"message":"bad creds"}"#.into())]).await;
        let client = client_for(&server);
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ApplianceError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn login_without_token_is_auth_failed() {
        let server = MockServer::start(vec![(200, r#"{"data":{"user":{}}}"#.into())]).await;
        let client = client_for(&server);
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ApplianceError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn create_folder_logs_in_lazily() {
        let server =
            MockServer::start(vec![(200, LOGIN_OK.into()), (201, String::new())]).await;
        let client = client_for(&server);
        client.create_folder("/vol1/src").await.unwrap();

        let req = server.request_text(1);
        assert!(req.starts_with("POST /v2_1/files/folder"));
        assert!(req.contains(r#"{"path":"/vol1/src"}"#));
        // Raw token, no Bearer prefix.
        assert!(req.to_lowercase().contains("authorization: tok-1"));
    }

    #[tokio::test]
    async fn create_folder_conflict_is_success() {
        let server =
            MockServer::start(vec![(200, LOGIN_OK.into()), (409, "conflict".into())]).await;
        let client = client_for(&server);
        client.create_folder("/vol1/src").await.unwrap();
    }

    #[tokio::test]
    async fn create_folder_exists_message_is_success() {
        for body in [
            String::new(),
            "folder already exists".to_string(),
            r#"{"message":"path already exist"}"#.to_string(),
        ] {
            let server = MockServer::start(vec![(200, LOGIN_OK.into()), (400, body)]).await;
            let client = client_for(&server);
            client.create_folder("/vol1/src").await.unwrap();
        }
    }

    #[tokio::test]
    async fn create_folder_server_error_bubbles() {
        let server =
            MockServer::start(vec![(200, LOGIN_OK.into()), (500, "broken".into())]).await;
        let client = client_for(&server);
        let err = client.create_folder("/vol1/src").await.unwrap_err();
        assert!(matches!(err, ApplianceError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn upload_file_streams_multipart() {
        let server = MockServer::start(vec![
            (200, LOGIN_OK.into()),
            (200, r#"{"success":true}"#.into()),
        ])
        .await;
        let client = client_for(&server);

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, b"hello world\n").unwrap();

        let transferred = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&transferred);
        let progress: ProgressFn = Arc::new(move |delta| {
            counter.fetch_add(delta, Ordering::SeqCst);
        });

        client
            .upload_file(CancellationToken::new(), &local, "/vol1/src/a.txt", progress)
            .await
            .unwrap();

        assert_eq!(transferred.load(Ordering::SeqCst), 12);

        let req = server.request_text(1);
        assert!(req.starts_with("POST /v2_1/files/file/uploadV2"));
        assert!(req.contains("name=\"path\""));
        assert!(req.contains("/vol1/src"));
        assert!(req.contains("filename=\"a.txt\""));
        assert!(req.contains("name=\"modTime\""));
        assert!(req.contains("a.txt:"));
        assert!(req.contains("hello world"));
    }

    #[tokio::test]
    async fn upload_file_non_2xx_is_upload_failed() {
        let server = MockServer::start(vec![
            (200, LOGIN_OK.into()),
            (500, "out of space".into()),
        ])
        .await;
        let client = client_for(&server);

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, b"data").unwrap();

        let err = client
            .upload_file(
                CancellationToken::new(),
                &local,
                "/vol1/src/a.txt",
                noop_progress(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApplianceError::UploadFailed { status: 500, .. }));
    }

    #[tokio::test]
    async fn upload_cancelled_token_aborts() {
        let server = MockServer::start(vec![(200, LOGIN_OK.into())]).await;
        let client = client_for(&server);

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, vec![0u8; 1024]).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .upload_file(cancel, &local, "/vol1/src/a.txt", noop_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplianceError::Cancelled));
    }

    #[tokio::test]
    async fn upload_cancel_mid_stream_aborts_request() {
        // Login server, then a sink that accepts the upload but never replies.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");

        let handle = tokio::spawn(async move {
            // First connection: login.
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = read_http_request(&mut stream).await;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{LOGIN_OK}",
                    LOGIN_OK.len()
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
            // Second connection: swallow bytes forever without responding.
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 8192];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            }
        });

        let client = ZimaClient::new(&url, "admin", "pw", Duration::from_secs(5))
            .unwrap()
            .with_chunk_size(1024);

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("big.bin");
        std::fs::write(&local, vec![7u8; 4 * 1024 * 1024]).unwrap();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = client
            .upload_file(cancel, &local, "/vol1/src/big.bin", noop_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplianceError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));

        handle.abort();
    }

    #[tokio::test]
    async fn get_file_info_finds_entry() {
        let listing = r#"{"content":[
            {"name":"a.txt","size":12,"modified":1700000000,"is_dir":false,"path":"/vol1/src/a.txt"},
            {"name":"b.txt","size":3,"modified":1700000001,"is_dir":false,"path":"/vol1/src/b.txt"}
        ],"index":0,"size":10000,"total":2}"#;
        let server =
            MockServer::start(vec![(200, LOGIN_OK.into()), (200, listing.into())]).await;
        let client = client_for(&server);

        let info = client.get_file_info("/vol1/src/a.txt").await.unwrap();
        assert_eq!(info.size, 12);
        assert!(!info.is_dir);

        // Parent path is url-encoded into the listing query.
        let req = server.request_text(1);
        assert!(req.starts_with("GET /v2_1/files/file?path=%2Fvol1%2Fsrc&index=0&size=10000"));
        assert!(req.contains("sfz=true"));
        assert!(req.contains("sort=name"));
        assert!(req.contains("direction=asc"));
    }

    #[tokio::test]
    async fn get_file_info_missing_is_not_found() {
        let listing = r#"{"content":[],"index":0,"size":10000,"total":0}"#;
        let server =
            MockServer::start(vec![(200, LOGIN_OK.into()), (200, listing.into())]).await;
        let client = client_for(&server);

        let err = client.get_file_info("/vol1/src/gone.txt").await.unwrap_err();
        assert!(matches!(err, ApplianceError::NotFound(_)));
    }

    #[tokio::test]
    async fn download_partial_sends_range() {
        let server =
            MockServer::start(vec![(200, LOGIN_OK.into()), (206, "hello".into())]).await;
        let client = client_for(&server);

        let data = client.download_partial("/vol1/src/a.txt", 5).await.unwrap();
        assert_eq!(&data, b"hello");

        let req = server.request_text(1).to_lowercase();
        assert!(req.contains("range: bytes=0-4"));
        assert!(req.contains("token=tok-1"));
        assert!(req.contains("action=download"));
    }

    #[tokio::test]
    async fn download_partial_truncates_full_responses() {
        let server = MockServer::start(vec![
            (200, LOGIN_OK.into()),
            (200, "hello world, much longer than asked".into()),
        ])
        .await;
        let client = client_for(&server);

        let data = client.download_partial("/vol1/src/a.txt", 5).await.unwrap();
        assert_eq!(&data, b"hello");
    }

    #[tokio::test]
    async fn list_storages_parses_devices() {
        let body = r#"[{"name":"ZimaOS-HD","path":"/media/ZimaOS-HD","type":"sata"}]"#;
        let server =
            MockServer::start(vec![(200, LOGIN_OK.into()), (200, body.into())]).await;
        let client = client_for(&server);

        let storages = client.list_storages().await.unwrap();
        assert_eq!(storages.len(), 1);
        assert_eq!(storages[0].name, "ZimaOS-HD");
        assert_eq!(storages[0].kind, "sata");
    }

    #[test]
    fn folder_exists_reply_matrix() {
        assert!(folder_exists_reply(""));
        assert!(folder_exists_reply("folder already exists"));
        assert!(folder_exists_reply("directory already exists"));
        assert!(folder_exists_reply(r#"{"message":"path already exist"}"#));
        assert!(!folder_exists_reply("permission denied"));
        assert!(!folder_exists_reply(r#"{"message":"quota exceeded"}"#));
    }
}
