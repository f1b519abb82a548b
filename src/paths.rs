//! Well-known on-disk locations and the shared atomic-write helper.
//!
//! Every writer in this crate (config, injector, workflow state, sync
//! backups) goes through [`atomic_write`] so a crash mid-write never leaves
//! a torn file behind — temp file in the same directory, then `rename`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ddx_err, DdxError, ErrorCode};

/// Project-relative `.ddx/` root.
pub fn ddx_dir(project_root: &Path) -> PathBuf {
    project_root.join(".ddx")
}

pub fn config_path(project_root: &Path) -> PathBuf {
    ddx_dir(project_root).join("config.yaml")
}

pub fn env_config_path(project_root: &Path, env: &str) -> PathBuf {
    ddx_dir(project_root).join(format!("config.{}.yaml", env))
}

pub fn local_dir(project_root: &Path) -> PathBuf {
    ddx_dir(project_root).join("local")
}

pub fn workflows_active_dir(project_root: &Path) -> PathBuf {
    local_dir(project_root).join("workflows").join("active")
}

pub fn workflow_instance_dir(project_root: &Path, workflow_name: &str) -> PathBuf {
    workflows_active_dir(project_root).join(workflow_name)
}

pub fn workflow_archive_dir(project_root: &Path) -> PathBuf {
    local_dir(project_root).join("workflows").join("archive")
}

pub fn sync_dir(project_root: &Path) -> PathBuf {
    local_dir(project_root).join("sync")
}

pub fn sync_lock_path(project_root: &Path) -> PathBuf {
    local_dir(project_root).join(".sync.lock")
}

pub fn conflicts_path(project_root: &Path) -> PathBuf {
    sync_dir(project_root).join("conflicts.yml")
}

pub fn backups_dir(project_root: &Path) -> PathBuf {
    ddx_dir(project_root).join("backups")
}

pub fn library_dir(project_root: &Path) -> PathBuf {
    ddx_dir(project_root).join("library")
}

/// Per-user global config, consulted before the project-local one.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ddx").join("config.yaml"))
}

pub fn global_library_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ddx").join("library"))
}

/// Per-user update-check cache under `~/.cache/ddx/`.
pub fn update_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|c| c.join("ddx").join("last-update-check.json"))
}

/// Write `contents` to `path` atomically: a sibling temp file is written
/// first and then renamed over the destination, so readers never observe a
/// partially-written file. Creates parent directories as needed.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), DdxError> {
    let parent = path.parent().ok_or_else(|| {
        ddx_err!(ErrorCode::ErrInvalidPath, "path has no parent directory: {:?}", path)
    })?;
    fs::create_dir_all(parent)
        .map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to create {:?}", parent).with_cause(e.into()))?;

    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("ddx"),
        uuid::Uuid::new_v4()
    );
    let tmp_path = parent.join(tmp_name);

    fs::write(&tmp_path, contents)
        .map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to write {:?}", tmp_path).with_cause(e.into()))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ddx_err!(ErrorCode::ErrIo, "failed to rename {:?} -> {:?}", tmp_path, path).with_cause(e.into())
    })?;

    Ok(())
}

/// Timestamped backup of a single file, used before mutating config saves.
pub fn backup_file_beside(path: &Path) -> std::io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let ts = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let backup_name = format!(
        "{}.{}.bak",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        ts
    );
    let backup_path = path.with_file_name(backup_name);
    fs::copy(path, &backup_path)?;
    Ok(Some(backup_path))
}

/// An advisory exclusive lock backed by a lock file's exclusive creation
/// (`OpenOptions::create_new`). Held only while the RAII guard is alive;
/// dropping it removes the lock file. Used for the workflow state file
/// (`ErrConcurrentMutation`) and the sync lock (`ErrSyncBusy`).
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, failing with `already_exists` if another
    /// process (or an earlier un-dropped guard) holds it.
    pub fn acquire(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::OpenOptions::new().write(true).create_new(true).open(&path)?;
        Ok(Self { path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_lock_is_exclusive_until_dropped() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join(".x.lock");
        let guard = FileLock::acquire(lock_path.clone()).unwrap();
        assert!(FileLock::acquire(lock_path.clone()).is_err());
        drop(guard);
        assert!(FileLock::acquire(lock_path).is_ok());
    }

    #[test]
    fn atomic_write_creates_parents_and_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/c.yaml");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn atomic_write_overwrites_cleanly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.yaml");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        // no leftover temp files
        let leftover = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .count();
        assert_eq!(leftover, 0);
    }
}
