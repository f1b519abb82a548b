//! Config & library resolver.
//!
//! The shared substrate every other subsystem depends on: hierarchical
//! config loading, library path resolution, schema validation, and legacy
//! migration.

pub mod expand;
pub mod migrate;
pub mod schema;
pub mod validate;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use schema::{Config, LibraryOrigin, ResolvedLibrary, ValidationError};

use crate::error::{ddx_err, DdxError, ErrorCode};
use crate::paths::{atomic_write, backup_file_beside, config_path, env_config_path, global_config_path};

/// Explicit overrides the CLI adapter may pass in; these win over every
/// other layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub library_base_path: Option<PathBuf>,
    pub values: HashMap<String, String>,
}

/// Load the layered effective configuration starting from `working_dir`:
/// `defaults <- global <- project <- env-file <- env vars <- explicit
/// overrides`, highest priority wins.
///
/// A missing project config is not an error: callers get the "zero
/// config" default with `workflows.active = []`.
pub fn load(working_dir: &Path, overrides: &Overrides) -> Result<Config, DdxError> {
    let mut merged = serde_yaml::Value::Mapping(Default::default());

    if let Some(global_path) = global_config_path() {
        if let Some(doc) = read_yaml_if_exists(&global_path)? {
            merge_yaml(&mut merged, doc);
        }
    }

    let project_root = find_project_root(working_dir);
    if let Some(doc) = read_yaml_if_exists(&config_path(&project_root))? {
        merge_yaml(&mut merged, doc);
    }

    if let Ok(env) = std::env::var("DDX_ENV") {
        if let Some(doc) = read_yaml_if_exists(&env_config_path(&project_root, &env))? {
            merge_yaml(&mut merged, doc);
        }
    }

    merge_yaml(&mut merged, env_var_overrides());
    merge_yaml(&mut merged, explicit_overrides(overrides));

    // Nothing was layered at all: return the documented zero-config value.
    if matches!(&merged, serde_yaml::Value::Mapping(m) if m.is_empty()) {
        return Ok(Config::default());
    }

    // Defaults backfill: deserializing the merged document alone would
    // reject a document missing `library`, so seed it with the defaults
    // first and let the layers above override individual fields.
    let mut base = serde_yaml::to_value(Config::default())
        .map_err(|e| ddx_err!(ErrorCode::ErrConfigInvalid, "internal: default config is not serializable").with_cause(e.into()))?;
    merge_yaml(&mut base, merged);

    let config: Config = serde_yaml::from_value(base)
        .map_err(|e| ddx_err!(ErrorCode::ErrConfigInvalid, "config failed to parse").with_cause(e.into()))?;

    let errors = validate::validate(&config);
    if validate::is_blocking(&errors) {
        return Err(ddx_err!(
            ErrorCode::ErrConfigInvalid,
            "config failed validation: {}",
            errors
                .iter()
                .map(|e| format!("{} ({})", e.path, e.rule))
                .collect::<Vec<_>>()
                .join("; ")
        ));
    }

    Ok(config)
}

/// Schema-driven validation against the invariants `config/validate.rs` enforces.
pub fn validate(config: &Config) -> Vec<ValidationError> {
    validate::validate(config)
}

/// Atomically persist `config` to `<project_root>/.ddx/config.yaml`,
/// backing up the prior file first.
pub fn save(project_root: &Path, config: &Config) -> Result<(), DdxError> {
    let path = config_path(project_root);
    backup_file_beside(&path)
        .map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to back up {:?}", path).with_cause(e.into()))?;

    let serialized = serde_yaml::to_string(config)
        .map_err(|e| ddx_err!(ErrorCode::ErrConfigInvalid, "failed to serialize config").with_cause(e.into()))?;

    atomic_write(&path, serialized.as_bytes())
}

/// Resolve the active library directory, highest priority first:
/// 1. `--library-base-path` flag (`overrides.library_base_path`)
/// 2. `DDX_LIBRARY_BASE_PATH` env var
/// 3. this repo's own `library/`, if `working_dir` is inside a checkout of
///    DDx itself (self-hosting case)
/// 4. nearest `.ddx/library/` walking upward from `working_dir`
/// 5. global `~/.ddx/library/`
pub fn resolve_library(working_dir: &Path, overrides: &Overrides) -> Result<ResolvedLibrary, DdxError> {
    if let Some(path) = &overrides.library_base_path {
        return Ok(ResolvedLibrary {
            path: path.clone(),
            origin: LibraryOrigin::CliFlag,
        });
    }

    if let Ok(path) = std::env::var("DDX_LIBRARY_BASE_PATH") {
        return Ok(ResolvedLibrary {
            path: PathBuf::from(path),
            origin: LibraryOrigin::EnvVar,
        });
    }

    if let Some(self_lib) = find_self_hosted_library(working_dir) {
        return Ok(ResolvedLibrary {
            path: self_lib,
            origin: LibraryOrigin::SelfRepo,
        });
    }

    let mut current = working_dir.to_path_buf();
    loop {
        let candidate = current.join(".ddx").join("library");
        if candidate.is_dir() {
            return Ok(ResolvedLibrary {
                path: candidate,
                origin: LibraryOrigin::ProjectLibrary,
            });
        }
        match current.parent() {
            Some(p) => current = p.to_path_buf(),
            None => break,
        }
    }

    if let Some(global) = crate::paths::global_library_dir() {
        if global.is_dir() {
            return Ok(ResolvedLibrary {
                path: global,
                origin: LibraryOrigin::GlobalLibrary,
            });
        }
    }

    Err(ddx_err!(ErrorCode::ErrLibraryMissing, "no library found from {:?}", working_dir)
        .with_suggestion("run 'ddx init' to set up a library"))
}

fn find_self_hosted_library(working_dir: &Path) -> Option<PathBuf> {
    let mut current = working_dir.to_path_buf();
    loop {
        let cargo_toml = current.join("Cargo.toml");
        let library = current.join("library");
        if cargo_toml.is_file() && library.is_dir() {
            if let Ok(text) = std::fs::read_to_string(&cargo_toml) {
                if text.contains("name = \"ddx\"") {
                    return Some(library);
                }
            }
        }
        match current.parent() {
            Some(p) => current = p.to_path_buf(),
            None => return None,
        }
    }
}

fn find_project_root(working_dir: &Path) -> PathBuf {
    let mut current = working_dir.to_path_buf();
    loop {
        if current.join(".ddx").is_dir() {
            return current;
        }
        match current.parent() {
            Some(p) => current = p.to_path_buf(),
            None => return working_dir.to_path_buf(),
        }
    }
}

fn read_yaml_if_exists(path: &Path) -> Result<Option<serde_yaml::Value>, DdxError> {
    if !path.is_file() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to read {:?}", path).with_cause(e.into()))?;
    let value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .map_err(|e| ddx_err!(ErrorCode::ErrConfigInvalid, "failed to parse {:?}", path).with_cause(e.into()))?;
    Ok(Some(value))
}

/// `DDX_*` environment variables map onto dotted config paths via a double
/// underscore path separator, e.g. `DDX_WORKFLOWS__SAFE_WORD=FOO` sets
/// `workflows.safe_word`. The three reserved variables consumed elsewhere
/// (`DDX_LIBRARY_BASE_PATH`, `DDX_ENV`, `DDX_DISABLE_UPDATE_CHECK`) are
/// skipped here.
fn env_var_overrides() -> serde_yaml::Value {
    const RESERVED: &[&str] = &["DDX_LIBRARY_BASE_PATH", "DDX_ENV", "DDX_DISABLE_UPDATE_CHECK"];
    let mut root = serde_yaml::Value::Mapping(Default::default());
    for (key, value) in std::env::vars() {
        if !key.starts_with("DDX_") || RESERVED.contains(&key.as_str()) {
            continue;
        }
        let path: Vec<String> = key
            .trim_start_matches("DDX_")
            .split("__")
            .map(|s| s.to_lowercase())
            .collect();
        set_path(&mut root, &path, serde_yaml::Value::String(value));
    }
    root
}

fn explicit_overrides(overrides: &Overrides) -> serde_yaml::Value {
    let mut root = serde_yaml::Value::Mapping(Default::default());
    for (key, value) in &overrides.values {
        let path: Vec<String> = key.split('.').map(|s| s.to_string()).collect();
        set_path(&mut root, &path, serde_yaml::Value::String(value.clone()));
    }
    root
}

fn set_path(root: &mut serde_yaml::Value, path: &[String], value: serde_yaml::Value) {
    if path.is_empty() {
        return;
    }
    if !root.is_mapping() {
        *root = serde_yaml::Value::Mapping(Default::default());
    }
    let map = root.as_mapping_mut().unwrap();
    let key = serde_yaml::Value::String(path[0].clone());
    if path.len() == 1 {
        map.insert(key, value);
    } else {
        let entry = map
            .entry(key)
            .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
        set_path(entry, &path[1..], value);
    }
}

/// Deep-merge `overlay` into `base`, with `overlay` winning on scalar
/// conflicts and mapping keys merging recursively.
fn merge_yaml(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_with_no_config_returns_zero_config() {
        let dir = tempdir().unwrap();
        let config = load(dir.path(), &Overrides::default()).unwrap();
        assert!(config.workflows.active.is_empty());
        assert_eq!(config.workflows.safe_word, schema::DEFAULT_SAFE_WORD);
    }

    #[test]
    fn load_round_trips_through_save() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".ddx")).unwrap();
        let mut config = Config::default();
        config.workflows.active = vec!["helix".to_string()];
        save(dir.path(), &config).unwrap();

        let reloaded = load(dir.path(), &Overrides::default()).unwrap();
        assert_eq!(reloaded.workflows.active, vec!["helix".to_string()]);
    }

    #[test]
    fn unknown_top_level_key_is_preserved() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".ddx")).unwrap();
        std::fs::write(
            config_path(dir.path()),
            "version: \"1.0\"\nlibrary:\n  path: ./.ddx/library\nfrom_the_future: true\n",
        )
        .unwrap();

        let config = load(dir.path(), &Overrides::default()).unwrap();
        assert!(config.unknown.contains_key("from_the_future"));

        save(dir.path(), &config).unwrap();
        let raw = std::fs::read_to_string(config_path(dir.path())).unwrap();
        assert!(raw.contains("from_the_future"));
    }

    #[test]
    fn explicit_override_wins_over_project_file() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".ddx")).unwrap();
        std::fs::write(
            config_path(dir.path()),
            "version: \"1.0\"\nlibrary:\n  path: ./.ddx/library\nworkflows:\n  safe_word: FROMFILE\n",
        )
        .unwrap();

        let mut overrides = Overrides::default();
        overrides
            .values
            .insert("workflows.safe_word".to_string(), "FROMOVERRIDE".to_string());

        let config = load(dir.path(), &overrides).unwrap();
        assert_eq!(config.workflows.safe_word, "FROMOVERRIDE");
    }

    #[test]
    fn resolve_library_falls_back_to_project_library() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".ddx").join("library")).unwrap();
        let resolved = resolve_library(dir.path(), &Overrides::default()).unwrap();
        assert_eq!(resolved.origin, LibraryOrigin::ProjectLibrary);
    }

    #[test]
    fn resolve_library_missing_is_an_error() {
        let dir = tempdir().unwrap();
        let err = resolve_library(dir.path(), &Overrides::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrLibraryMissing);
    }
}
