//! A developer-experience toolkit: git-subtree library sync, declarative
//! phase-based workflow execution, agent request routing, and CLAUDE.md
//! meta-prompt/persona injection, built around one shared project-local
//! `.ddx/` state tree.

pub mod config;
pub mod error;
pub mod injector;
pub mod library;
pub mod paths;
pub mod router;
pub mod sync;
pub mod update;
pub mod workflow;

pub use error::{DdxError, ErrorCategory, ErrorCode, Result};

use std::path::{Path, PathBuf};

use config::{Config, Overrides};
use library::Library;
use sync::git_client::RealGitClient;
use sync::SyncEngine;

/// The crate's single facade: resolves config and library for a project
/// root once, then hands out the per-subsystem engines that do the
/// actual work. Thin — every method here just wires together the
/// subsystem already documented in its own module.
pub struct Ddx {
    project_root: PathBuf,
    config: Config,
    library: Library,
}

impl Ddx {
    /// Resolve config and library for `project_root`, per spec §4.A.
    pub fn open(project_root: &Path, overrides: &Overrides) -> Result<Self> {
        let config = config::load(project_root, overrides)?;
        let library = library::resolve(project_root, overrides)?;
        Ok(Self {
            project_root: project_root.to_path_buf(),
            config,
            library,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// A `SyncEngine` bound to this project's repository configuration.
    /// Callers own the `RealGitClient` so its lifetime outlives the
    /// engine; tests construct a `SyncEngine` directly against a
    /// `FakeGitClient` instead of going through this facade.
    pub fn sync_engine<'a>(&self, git: &'a RealGitClient) -> SyncEngine<'a> {
        SyncEngine::new(self.project_root.clone(), self.config.library.repository.clone(), git)
    }

    pub fn real_git_client(&self) -> RealGitClient {
        RealGitClient::new(self.project_root.clone())
    }

    pub fn workflow_engine(&self) -> workflow::Engine<'_> {
        workflow::Engine::new(self.project_root.clone(), &self.library)
    }

    pub fn update_checker(&self) -> update::UpdateChecker {
        update::UpdateChecker::new(self.config.update_check.frequency_secs, self.config.update_check.enabled)
    }

    /// `Router::route` bound to this project's active workflows and
    /// library, using a process-lifetime caching loader.
    pub fn route(&self, utterance: &str) -> router::Decision {
        let loader = library::FsWorkflowDefinitionLoader::new(self.library.root.clone());
        router::route(utterance, &self.config, &loader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_on_empty_project_returns_zero_config_and_global_library_error() {
        let dir = tempdir().unwrap();
        let err = Ddx::open(dir.path(), &Overrides::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrLibraryMissing);
    }

    #[test]
    fn open_resolves_project_library_when_present() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".ddx/library/personas")).unwrap();
        let ddx = Ddx::open(dir.path(), &Overrides::default()).unwrap();
        assert_eq!(ddx.library().root, dir.path().join(".ddx/library"));
    }
}
