//! Source folder scanning for migration.
//!
//! Walks each selected folder depth-first and produces the upload work
//! list with remote paths normalized to forward slashes. NAS system
//! directories (names starting with `@`) are always skipped; `#recycle`
//! is skipped unless explicitly included.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A single file queued for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Absolute path on the local host.
    pub local_path: PathBuf,
    /// Destination path on the appliance, `/`-separated.
    pub remote_path: String,
    /// File size in bytes at scan time.
    pub size: i64,
}

/// Errors produced while building the work list.
///
/// Per-entry stat failures are not errors — the walk logs them and
/// continues. Only an unreadable source root fails the scan.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source is not a directory: {0}")]
    NotADirectory(String),
}

/// Scans the given source folders and returns the work list plus total size.
///
/// A file at `<folder>/<rel>` maps to `<base_path>/<basename(folder)>/<rel>`
/// on the appliance. Symbolic links and non-regular files are ignored.
pub fn scan_folders(
    folders: &[String],
    base_path: &str,
    include_recycle: bool,
) -> Result<(Vec<WorkItem>, i64), ScanError> {
    let mut items = Vec::new();
    let mut total_bytes: i64 = 0;

    for folder in folders {
        let root = Path::new(folder);
        let meta = std::fs::metadata(root)?;
        if !meta.is_dir() {
            return Err(ScanError::NotADirectory(folder.clone()));
        }

        let folder_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| folder.trim_matches('/').to_string());
        let remote_root = join_remote(base_path, &folder_name);

        walk_dir(root, root, &remote_root, include_recycle, &mut items, &mut total_bytes)?;
    }

    debug!(files = items.len(), total_bytes, "scan complete");
    Ok((items, total_bytes))
}

fn walk_dir(
    root: &Path,
    current: &Path,
    remote_root: &str,
    include_recycle: bool,
    items: &mut Vec<WorkItem>,
    total_bytes: &mut i64,
) -> Result<(), ScanError> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %current.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();

        // file_type does not follow symlinks, so links are dropped here.
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to stat entry");
                continue;
            }
        };

        if file_type.is_dir() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('@') {
                debug!(path = %path.display(), "skipping system directory");
                continue;
            }
            if !include_recycle && name == "#recycle" {
                debug!(path = %path.display(), "skipping recycle bin");
                continue;
            }
            walk_dir(root, &path, remote_root, include_recycle, items, total_bytes)?;
        } else if file_type.is_file() {
            let size = match entry.metadata() {
                Ok(m) => m.len() as i64,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read metadata");
                    continue;
                }
            };

            let rel = match path.strip_prefix(root) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let rel_str = rel.to_string_lossy().replace('\\', "/");

            items.push(WorkItem {
                local_path: path,
                remote_path: join_remote(remote_root, &rel_str),
                size,
            });
            *total_bytes += size;
        }
        // Symlinks and special files fall through.
    }

    Ok(())
}

/// Joins remote path segments with exactly one `/` between them.
fn join_remote(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    format!("{base}/{rest}")
}
