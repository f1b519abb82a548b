//! Backup snapshots of the library subtree (spec §3 "Backup", §4.F
//! "every mutating operation produces a backup before write").

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ddx_err, DdxError, ErrorCode};
use crate::paths::backups_dir;

pub const DEFAULT_RETENTION: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub id: String,
    pub timestamp: String,
    pub operation: String,
    pub source_commit: Option<String>,
    pub file_count: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupInfo {
    pub manifest: Manifest,
    pub dir: PathBuf,
}

/// Snapshot the full `library_dir` tree into
/// `.ddx/backups/<timestamp>-<operation>/`, trimming to `retention` oldest
/// entries removed.
pub fn create(project_root: &Path, library_dir: &Path, operation: &str, source_commit: Option<&str>, retention: usize) -> Result<BackupInfo, DdxError> {
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
    let id = format!("{}-{}", timestamp, operation);
    let dest = backups_dir(project_root).join(&id);

    let (file_count, total_bytes) = copy_tree(library_dir, &dest)?;

    let manifest = Manifest {
        id: id.clone(),
        timestamp,
        operation: operation.to_string(),
        source_commit: source_commit.map(str::to_string),
        file_count,
        total_bytes,
    };
    let serialized = serde_json::to_string_pretty(&manifest)
        .map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to serialize backup manifest").with_cause(e.into()))?;
    crate::paths::atomic_write(&dest.join("manifest.json"), serialized.as_bytes())?;

    trim_retention(project_root, retention)?;

    Ok(BackupInfo { manifest, dir: dest })
}

fn copy_tree(from: &Path, to: &Path) -> Result<(u64, u64), DdxError> {
    std::fs::create_dir_all(to).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to create {:?}", to).with_cause(e.into()))?;

    let mut file_count = 0u64;
    let mut total_bytes = 0u64;
    if !from.is_dir() {
        return Ok((0, 0));
    }

    for entry in walkdir::WalkDir::new(from) {
        let entry = entry.map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to walk {:?}", from).with_cause(e.into()))?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to create {:?}", target).with_cause(e.into()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to create {:?}", parent).with_cause(e.into()))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to copy {:?}", entry.path()).with_cause(e.into()))?;
            file_count += 1;
            total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok((file_count, total_bytes))
}

pub fn list(project_root: &Path) -> Result<Vec<BackupInfo>, DdxError> {
    let dir = backups_dir(project_root);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut backups = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to list {:?}", dir).with_cause(e.into()))? {
        let entry = entry.map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to read backup entry").with_cause(e.into()))?;
        if !entry.path().is_dir() {
            continue;
        }
        let manifest_path = entry.path().join("manifest.json");
        let raw = match std::fs::read_to_string(&manifest_path) {
            Ok(raw) => raw,
            Err(_) => continue,
        };
        let manifest: Manifest = serde_json::from_str(&raw)
            .map_err(|e| ddx_err!(ErrorCode::ErrBackupCorrupt, "malformed manifest at {:?}", manifest_path).with_cause(e.into()))?;
        backups.push(BackupInfo { manifest, dir: entry.path() });
    }
    backups.sort_by(|a, b| a.manifest.timestamp.cmp(&b.manifest.timestamp));
    Ok(backups)
}

/// Restore `library_dir` from the named backup (spec §4.F `Rollback`).
pub fn rollback(project_root: &Path, library_dir: &Path, backup_id: &str) -> Result<(), DdxError> {
    let backups = list(project_root)?;
    let found = backups
        .iter()
        .find(|b| b.manifest.id == backup_id)
        .ok_or_else(|| ddx_err!(ErrorCode::ErrBackupCorrupt, "no such backup '{}'", backup_id))?;

    if library_dir.is_dir() {
        std::fs::remove_dir_all(library_dir).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to clear {:?}", library_dir).with_cause(e.into()))?;
    }
    let (copied, _) = copy_tree(&found.dir, library_dir)?;
    if copied != found.manifest.file_count {
        return Err(ddx_err!(
            ErrorCode::ErrBackupCorrupt,
            "backup '{}' expected {} files but restored {}",
            backup_id,
            found.manifest.file_count,
            copied
        ));
    }
    Ok(())
}

/// The next-older backup before `backup_id`, for the "offer the next-older
/// backup via ListBackups" failure path (spec §4.F).
pub fn next_older(backups: &[BackupInfo], backup_id: &str) -> Option<&BackupInfo> {
    let idx = backups.iter().position(|b| b.manifest.id == backup_id)?;
    if idx == 0 {
        None
    } else {
        backups.get(idx - 1)
    }
}

fn trim_retention(project_root: &Path, retention: usize) -> Result<(), DdxError> {
    let mut backups = list(project_root)?;
    if backups.len() <= retention {
        return Ok(());
    }
    backups.sort_by(|a, b| a.manifest.timestamp.cmp(&b.manifest.timestamp));
    let overflow = backups.len() - retention;
    for backup in &backups[..overflow] {
        let _ = std::fs::remove_dir_all(&backup.dir);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn build_library(dir: &Path) {
        std::fs::create_dir_all(dir.join("personas")).unwrap();
        std::fs::write(dir.join("personas").join("a.md"), "hello").unwrap();
    }

    #[test]
    fn create_and_list_round_trip() {
        let dir = tempdir().unwrap();
        let library = dir.path().join("library");
        build_library(&library);

        let info = create(dir.path(), &library, "pull", Some("abc123"), DEFAULT_RETENTION).unwrap();
        assert_eq!(info.manifest.file_count, 1);

        let listed = list(dir.path()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].manifest.id, info.manifest.id);
    }

    #[test]
    fn rollback_restores_tree_byte_for_byte() {
        let dir = tempdir().unwrap();
        let library = dir.path().join("library");
        build_library(&library);
        let info = create(dir.path(), &library, "pull", None, DEFAULT_RETENTION).unwrap();

        std::fs::write(library.join("personas").join("a.md"), "modified").unwrap();
        rollback(dir.path(), &library, &info.manifest.id).unwrap();

        assert_eq!(std::fs::read_to_string(library.join("personas").join("a.md")).unwrap(), "hello");
    }

    #[test]
    fn retention_trims_oldest_backups() {
        let dir = tempdir().unwrap();
        let library = dir.path().join("library");
        build_library(&library);

        for i in 0..3 {
            create(dir.path(), &library, &format!("op{}", i), None, 2).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(1100));
        }
        let backups = list(dir.path()).unwrap();
        assert!(backups.len() <= 2);
    }
}
