//! Checkpoint / restore.
//!
//! Scoped to the state file only — checkpoints capture the engine's own
//! bookkeeping, not produced artifacts.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{ddx_err, DdxError, ErrorCode};
use crate::paths::atomic_write;

pub fn checkpoints_dir(project_root: &Path, workflow_name: &str) -> PathBuf {
    crate::paths::workflow_instance_dir(project_root, workflow_name).join("checkpoints")
}

/// Snapshot `state.yml` into `checkpoints/<ts>-<id>/state.yml`, returning
/// the checkpoint id.
pub fn create(project_root: &Path, workflow_name: &str, state_path: &Path, now_ts: &str) -> Result<String, DdxError> {
    let id = format!("{}-{}", now_ts, &Uuid::new_v4().to_string()[..8]);
    let dir = checkpoints_dir(project_root, workflow_name).join(&id);
    std::fs::create_dir_all(&dir).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to create {:?}", dir).with_cause(e.into()))?;

    let contents = std::fs::read(state_path).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to read {:?}", state_path).with_cause(e.into()))?;
    atomic_write(&dir.join("state.yml"), &contents)?;
    Ok(id)
}

/// Replace `state.yml` with the contents of checkpoint `id`.
pub fn restore(project_root: &Path, workflow_name: &str, id: &str, state_path: &Path) -> Result<(), DdxError> {
    let snapshot = checkpoints_dir(project_root, workflow_name).join(id).join("state.yml");
    let contents = std::fs::read(&snapshot).map_err(|e| {
        ddx_err!(ErrorCode::ErrBackupCorrupt, "checkpoint '{}' not found or unreadable", id).with_cause(e.into())
    })?;
    atomic_write(state_path, &contents)
}

pub fn list(project_root: &Path, workflow_name: &str) -> Result<Vec<String>, DdxError> {
    let dir = checkpoints_dir(project_root, workflow_name);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut ids: Vec<String> = std::fs::read_dir(&dir)
        .map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to list {:?}", dir).with_cause(e.into()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    ids.sort();
    Ok(ids)
}
