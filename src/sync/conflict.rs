//! Conflict records, persisted only while unresolved (spec §3 "Conflict").

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ddx_err, DdxError, ErrorCode};
use crate::paths::{atomic_write, conflicts_path};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Mine,
    Theirs,
    Merged,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conflict {
    pub file: String,
    pub base_hash: String,
    pub local_hash: String,
    pub remote_hash: String,
    pub resolution: Resolution,
}

/// Persist the conflict list to `.ddx/local/sync/conflicts.yml`. An empty
/// list removes the file rather than writing an empty document.
pub fn save(project_root: &Path, conflicts: &[Conflict]) -> Result<(), DdxError> {
    let path = conflicts_path(project_root);
    if conflicts.is_empty() {
        if path.is_file() {
            std::fs::remove_file(&path).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to remove {:?}", path).with_cause(e.into()))?;
        }
        return Ok(());
    }
    let serialized = serde_yaml::to_string(conflicts)
        .map_err(|e| ddx_err!(ErrorCode::ErrStateCorrupt, "failed to serialize conflicts").with_cause(e.into()))?;
    atomic_write(&path, serialized.as_bytes())
}

pub fn load(project_root: &Path) -> Result<Vec<Conflict>, DdxError> {
    let path = conflicts_path(project_root);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to read {:?}", path).with_cause(e.into()))?;
    serde_yaml::from_str(&raw).map_err(|e| ddx_err!(ErrorCode::ErrStateCorrupt, "malformed conflicts.yml").with_cause(e.into()))
}

pub fn hash_content(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
