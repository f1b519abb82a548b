//! Append-only JSON Lines audit log.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ddx_err, DdxError, ErrorCode};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub actor: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A handle on one instance's audit log. Opens (creating if absent) and
/// keeps the path around; every write reopens in append mode so
/// concurrent readers never see a half-written line.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn open(path: PathBuf) -> Result<Self, DdxError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to create {:?}", parent).with_cause(e.into()))?;
        }
        if !path.is_file() {
            File::create(&path).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to create {:?}", path).with_cause(e.into()))?;
        }
        Ok(Self { path })
    }

    /// Append one record and fsync before returning, so a crash
    /// immediately after a write never loses the record.
    pub fn append(&self, record: &AuditRecord) -> Result<(), DdxError> {
        let line = serde_json::to_string(record)
            .map_err(|e| ddx_err!(ErrorCode::ErrStateCorrupt, "failed to serialize audit record").with_cause(e.into()))?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to open {:?}", self.path).with_cause(e.into()))?;

        writeln!(file, "{}", line).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to append audit record").with_cause(e.into()))?;
        file.sync_all().map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to fsync audit log").with_cause(e.into()))?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<AuditRecord>, DdxError> {
        let file = File::open(&self.path).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to open {:?}", self.path).with_cause(e.into()))?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to read audit log").with_cause(e.into()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = serde_json::from_str(&line)
                .map_err(|e| ddx_err!(ErrorCode::ErrStateCorrupt, "malformed audit record").with_cause(e.into()))?;
            records.push(record);
        }
        Ok(records)
    }

    /// True iff any record in the log matches `event` and `phase`. Used by
    /// the `user-approved` predicate.
    pub fn has_event_for_phase(&self, event: &str, phase_id: &str) -> bool {
        match self.read_all() {
            Ok(records) => records.iter().any(|r| r.event == event && r.phase.as_deref() == Some(phase_id)),
            Err(_) => false,
        }
    }

    pub fn last_record(&self) -> Result<Option<AuditRecord>, DdxError> {
        Ok(self.read_all()?.into_iter().last())
    }
}

pub fn record(actor: &str, event: &str, phase: Option<&str>) -> AuditRecord {
    AuditRecord {
        ts: Utc::now(),
        actor: actor.to_string(),
        event: event.to_string(),
        phase: phase.map(str::to_string),
        action: None,
        artifacts: Vec::new(),
        commit: None,
        extra: serde_json::Map::new(),
    }
}

pub fn audit_log_path(project_root: &Path, workflow_name: &str) -> PathBuf {
    crate::paths::workflow_instance_dir(project_root, workflow_name).join("audit.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_round_trips() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.log")).unwrap();
        log.append(&record("ddx", "workflow.initialized", None)).unwrap();
        log.append(&record("ddx", "phase.completed", Some("01-frame"))).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].event, "phase.completed");
    }

    #[test]
    fn has_event_for_phase_finds_approval() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.log")).unwrap();
        log.append(&record("human", "approval", Some("02-design"))).unwrap();
        assert!(log.has_event_for_phase("approval", "02-design"));
        assert!(!log.has_event_for_phase("approval", "01-frame"));
    }

    #[test]
    fn log_file_is_never_truncated_by_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        AuditLog::open(path.clone()).unwrap().append(&record("a", "e1", None)).unwrap();
        AuditLog::open(path.clone()).unwrap().append(&record("a", "e2", None)).unwrap();
        assert_eq!(AuditLog::open(path).unwrap().read_all().unwrap().len(), 2);
    }
}
