//! The resolved on-disk library.
//!
//! A thin handle over the library root plus the fixed top-level shape:
//! `workflows/<name>/`, `prompts/claude/system-prompts/<name>.md`,
//! `personas/<name>.md`, and the opaque `templates/`, `patterns/`,
//! `configs/` trees the core never inspects.

pub mod persona;
pub mod workflow_def;

use std::path::{Path, PathBuf};

pub use persona::Persona;
pub use workflow_def::{
    artifact_satisfied, AgentCommand, CachingWorkflowDefinitionLoader, ExitCriterion,
    FakeWorkflowDefinitionLoader, FsWorkflowDefinitionLoader, Phase, Triggers, Variable,
    WorkflowDefinition, WorkflowDefinitionLoader,
};

use crate::error::{ddx_err, DdxError, ErrorCode};

pub const DEFAULT_META_PROMPT: &str = "claude/system-prompts/focused.md";

/// A resolved library root, owned exclusively by the sync engine at the
/// subtree path. Every other subsystem only reads through this handle.
#[derive(Debug, Clone)]
pub struct Library {
    pub root: PathBuf,
}

impl Library {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.root.join("workflows")
    }

    pub fn workflow_dir(&self, name: &str) -> PathBuf {
        self.workflows_dir().join(name)
    }

    pub fn personas_dir(&self) -> PathBuf {
        self.root.join("personas")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.root.join("prompts")
    }

    /// `<library>/workflows/<name>/coordinator.md`, returned verbatim; the
    /// engine never parses it — coordinator/enforcer prose is opaque data.
    pub fn coordinator(&self, workflow_name: &str) -> Result<String, DdxError> {
        let path = self.workflow_dir(workflow_name).join("coordinator.md");
        std::fs::read_to_string(&path)
            .map_err(|e| ddx_err!(ErrorCode::ErrLibraryMissing, "coordinator missing at {:?}", path).with_cause(e.into()))
    }

    /// `<library>/workflows/<name>/phases/<NN-phase>/enforcer.md`, returned
    /// verbatim.
    pub fn enforcer(&self, workflow_name: &str, phase_id: &str) -> Result<String, DdxError> {
        let path = self
            .workflow_dir(workflow_name)
            .join("phases")
            .join(phase_id)
            .join("enforcer.md");
        std::fs::read_to_string(&path)
            .map_err(|e| ddx_err!(ErrorCode::ErrLibraryMissing, "enforcer missing at {:?}", path).with_cause(e.into()))
    }

    pub fn load_workflow(&self, name: &str) -> Result<WorkflowDefinition, DdxError> {
        FsWorkflowDefinitionLoader::new(self.root.clone()).load(name)
    }

    pub fn load_persona(&self, name: &str) -> Result<Persona, DdxError> {
        persona::load(&self.root, name)
    }

    /// `None` means "use the compiled-in default meta-prompt": a missing
    /// or null config value falls back to a built-in default.
    pub fn meta_prompt_path(&self, configured: Option<&str>) -> PathBuf {
        self.prompts_dir().join(configured.unwrap_or(DEFAULT_META_PROMPT))
    }

    pub fn read_meta_prompt(&self, configured: Option<&str>) -> Result<String, DdxError> {
        let path = self.meta_prompt_path(configured);
        std::fs::read_to_string(&path)
            .map_err(|e| ddx_err!(ErrorCode::ErrLibraryMissing, "meta-prompt missing at {:?}", path).with_cause(e.into()))
    }

    /// List workflow names present in the library, sorted.
    pub fn list_workflows(&self) -> Result<Vec<String>, DdxError> {
        let dir = self.workflows_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = std::fs::read_dir(&dir)
            .map_err(|e| ddx_err!(ErrorCode::ErrLibraryMissing, "failed to list {:?}", dir).with_cause(e.into()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Lazily validate that `personas` and `meta_prompt` referenced by
    /// `config` actually exist in this library; missing referents are
    /// reported, not silently ignored.
    pub fn validate_referents(&self, config: &crate::config::Config) -> Vec<ReferentError> {
        let mut errors = Vec::new();

        if let Some(configured) = config.system.meta_prompt_path() {
            let path = self.meta_prompt_path(Some(configured));
            if !path.is_file() {
                errors.push(ReferentError {
                    path: "system.meta_prompt".to_string(),
                    referent: configured.to_string(),
                });
            }
        }

        let mut persona_names: Vec<&String> = config.personas.bindings.values().collect();
        for overrides in config.personas.overrides.values() {
            persona_names.extend(overrides.values());
        }
        for name in persona_names {
            if !self.personas_dir().join(format!("{}.md", name)).is_file() {
                errors.push(ReferentError {
                    path: "personas".to_string(),
                    referent: name.clone(),
                });
            }
        }

        errors
    }

    /// True iff the library root exists and at least has a `workflows/`
    /// or `personas/` directory — the minimal shape check before any
    /// deeper operation runs.
    pub fn shape_is_plausible(&self) -> bool {
        self.root.is_dir() && (self.workflows_dir().is_dir() || self.personas_dir().is_dir())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferentError {
    pub path: String,
    pub referent: String,
}

/// Resolve the effective library for `project_root`, honoring the
/// priority order in [`crate::config::resolve_library`], and load it as a
/// [`Library`] handle.
pub fn resolve(project_root: &Path, overrides: &crate::config::Overrides) -> Result<Library, DdxError> {
    let resolved = crate::config::resolve_library(project_root, overrides)?;
    Ok(Library::new(resolved.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    fn build_library(dir: &Path) -> Library {
        std::fs::create_dir_all(dir.join("workflows").join("helix")).unwrap();
        std::fs::create_dir_all(dir.join("personas")).unwrap();
        std::fs::create_dir_all(dir.join("prompts").join("claude").join("system-prompts")).unwrap();
        std::fs::write(
            dir.join("prompts").join("claude").join("system-prompts").join("focused.md"),
            "Stay focused.",
        )
        .unwrap();
        std::fs::write(dir.join("personas").join("architect.md"), "Designs systems.").unwrap();
        Library::new(dir.to_path_buf())
    }

    #[test]
    fn list_workflows_is_sorted() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        std::fs::create_dir_all(library.workflow_dir("kanban")).unwrap();
        assert_eq!(library.list_workflows().unwrap(), vec!["helix".to_string(), "kanban".to_string()]);
    }

    #[test]
    fn default_meta_prompt_resolves_when_unconfigured() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        let text = library.read_meta_prompt(None).unwrap();
        assert_eq!(text, "Stay focused.");
    }

    #[test]
    fn validate_referents_flags_missing_persona() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        let mut config = Config::default();
        config.personas.bindings.insert("reviewer".to_string(), "ghost".to_string());
        let errors = library.validate_referents(&config);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].referent, "ghost");
    }

    #[test]
    fn shape_is_plausible_requires_known_subdirs() {
        let dir = tempdir().unwrap();
        let empty = Library::new(dir.path().join("nope"));
        assert!(!empty.shape_is_plausible());
        let library = build_library(dir.path());
        assert!(library.shape_is_plausible());
    }
}
