//! Engine configuration from environment variables.

use zimaport_appliance::DEFAULT_UPLOAD_CHUNK_SIZE;
use zimaport_store::DEFAULT_VERIFY_CHUNK_SIZE;

/// Runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database file (`DB_PATH`).
    pub db_path: String,
    /// Concurrent migration workers (`WORKER_COUNT`).
    pub worker_count: usize,
    /// Bounded task queue capacity (`QUEUE_CAPACITY`).
    pub queue_capacity: usize,
    /// Upload attempts per file (`MAX_RETRIES`).
    pub max_retries: u32,
    /// Default for post-upload verification (`ENABLE_VERIFICATION`).
    pub enable_verification: bool,
    /// Head-compare window in bytes (`VERIFY_CHUNK_SIZE`).
    pub verify_chunk_size: i64,
    /// Timeout for auxiliary appliance calls, seconds (`APPLIANCE_TIMEOUT`).
    pub appliance_timeout_secs: u64,
    /// Upload read-buffer size in bytes (`UPLOAD_CHUNK_SIZE`).
    pub upload_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: "zimaport.db".into(),
            worker_count: 3,
            queue_capacity: 100,
            max_retries: 3,
            enable_verification: false,
            verify_chunk_size: DEFAULT_VERIFY_CHUNK_SIZE,
            appliance_timeout_secs: 30,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
        }
    }
}

impl EngineConfig {
    /// Reads configuration from the environment, keeping defaults for
    /// unset or unparseable variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: env_string("DB_PATH", defaults.db_path),
            worker_count: env_parse("WORKER_COUNT", defaults.worker_count),
            queue_capacity: env_parse("QUEUE_CAPACITY", defaults.queue_capacity),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            enable_verification: env_parse("ENABLE_VERIFICATION", defaults.enable_verification),
            verify_chunk_size: env_parse("VERIFY_CHUNK_SIZE", defaults.verify_chunk_size),
            appliance_timeout_secs: env_parse("APPLIANCE_TIMEOUT", defaults.appliance_timeout_secs),
            upload_chunk_size: env_parse("UPLOAD_CHUNK_SIZE", defaults.upload_chunk_size),
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
