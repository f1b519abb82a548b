//! Small persisted bookkeeping for the sync engine: the last imported
//! upstream commit and (optionally cached) upstream commit, at
//! `.ddx/local/sync/state.yml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ddx_err, DdxError, ErrorCode};
use crate::paths::{atomic_write, sync_dir};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncState {
    pub imported_commit: Option<String>,
    pub upstream_commit: Option<String>,
    /// Set while a pull left conflicts unresolved (spec §4.F Pull step 8:
    /// "otherwise leave workflow marked sync-in-progress").
    pub sync_in_progress: bool,
}

fn path(project_root: &Path) -> std::path::PathBuf {
    sync_dir(project_root).join("state.yml")
}

pub fn load(project_root: &Path) -> Result<SyncState, DdxError> {
    let p = path(project_root);
    if !p.is_file() {
        return Ok(SyncState::default());
    }
    let raw = std::fs::read_to_string(&p).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to read {:?}", p).with_cause(e.into()))?;
    serde_yaml::from_str(&raw).map_err(|e| ddx_err!(ErrorCode::ErrStateCorrupt, "malformed sync state").with_cause(e.into()))
}

pub fn save(project_root: &Path, state: &SyncState) -> Result<(), DdxError> {
    let serialized = serde_yaml::to_string(state)
        .map_err(|e| ddx_err!(ErrorCode::ErrStateCorrupt, "failed to serialize sync state").with_cause(e.into()))?;
    atomic_write(&path(project_root), serialized.as_bytes())
}
