//! Legacy single-file config migration.
//!
//! Pre-1.0 DDx projects kept everything in a flat `.ddx.yml` with no
//! nested `library` block. `migrate` detects that shape and transforms it
//! into the current nested schema, writing a `.ddx.yml.bak` beside it.

use std::path::Path;

use serde::Deserialize;

use super::schema::{Config, LibraryConfig, RepositoryConfig, WorkflowsConfig, CURRENT_VERSION};
use crate::error::{ddx_err, DdxError, ErrorCode};
use crate::paths::atomic_write;

#[derive(Debug, Deserialize)]
struct LegacyConfig {
    #[serde(default)]
    library_path: Option<String>,
    #[serde(default)]
    repo_url: Option<String>,
    #[serde(default)]
    repo_branch: Option<String>,
    #[serde(default)]
    active_workflows: Option<Vec<String>>,
    #[serde(default)]
    safe_word: Option<String>,
}

/// A report of what migration changed, for the adapter to print.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub backed_up_to: std::path::PathBuf,
    pub fields_migrated: Vec<String>,
}

/// True iff `path` looks like a pre-1.0 flat config (no `library:` block,
/// i.e. it fails to parse as the current schema but does parse as the
/// legacy shape).
pub fn is_legacy(raw: &str) -> bool {
    serde_yaml::from_str::<Config>(raw).is_err() && serde_yaml::from_str::<LegacyConfig>(raw).is_ok()
}

pub fn migrate(legacy_path: &Path) -> Result<(Config, MigrationReport), DdxError> {
    let raw = std::fs::read_to_string(legacy_path)
        .map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to read {:?}", legacy_path).with_cause(e.into()))?;

    let legacy: LegacyConfig = serde_yaml::from_str(&raw).map_err(|e| {
        ddx_err!(ErrorCode::ErrConfigInvalid, "{:?} is not a recognizable legacy config", legacy_path)
            .with_cause(e.into())
    })?;

    let mut fields_migrated = Vec::new();
    let mut config = Config {
        version: CURRENT_VERSION.to_string(),
        ..Config::default()
    };

    if let Some(path) = legacy.library_path {
        config.library.path = path;
        fields_migrated.push("library_path -> library.path".to_string());
    }
    if legacy.repo_url.is_some() || legacy.repo_branch.is_some() {
        let mut repo = RepositoryConfig::default();
        if let Some(url) = legacy.repo_url {
            repo.url = url;
            fields_migrated.push("repo_url -> library.repository.url".to_string());
        }
        if let Some(branch) = legacy.repo_branch {
            repo.branch = branch;
            fields_migrated.push("repo_branch -> library.repository.branch".to_string());
        }
        config.library = LibraryConfig {
            path: config.library.path,
            repository: repo,
        };
    }
    if let Some(active) = legacy.active_workflows {
        fields_migrated.push("active_workflows -> workflows.active".to_string());
        config.workflows = WorkflowsConfig {
            active,
            safe_word: legacy
                .safe_word
                .clone()
                .unwrap_or_else(|| config.workflows.safe_word.clone()),
        };
    }
    if let Some(safe_word) = legacy.safe_word {
        fields_migrated.push("safe_word -> workflows.safe_word".to_string());
        config.workflows.safe_word = safe_word;
    }

    let backup_path = legacy_path.with_extension("yml.bak");
    atomic_write(&backup_path, raw.as_bytes())?;

    Ok((
        config,
        MigrationReport {
            backed_up_to: backup_path,
            fields_migrated,
        },
    ))
}
