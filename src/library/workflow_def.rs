//! `workflow.yml` parsing — the declarative shape of a workflow.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{ddx_err, DdxError, ErrorCode};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub coordinator: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub agent_commands: HashMap<String, AgentCommand>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub id: String,
    pub order: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub required_role: String,
    #[serde(default)]
    pub exit_criteria: Vec<ExitCriterion>,
    #[serde(default)]
    pub estimated_duration: Option<String>,
}

/// Tagged variant: adding a new criterion kind is a closed change in
/// this one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExitCriterion {
    /// A file path pattern, relative to the project root, that must exist
    /// and be non-empty.
    Artifact { path: String },
    /// A well-known predicate name handled internally by the workflow
    /// engine (`tests-passing`, `user-approved`, ...).
    Predicate { name: String },
}

impl ExitCriterion {
    /// The stable reason identifier used in `Blocked` reports, e.g.
    /// `artifact-missing: docs/prd.md`.
    pub fn label(&self) -> String {
        match self {
            ExitCriterion::Artifact { path } => path.clone(),
            ExitCriterion::Predicate { name } => name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentCommand {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub triggers: Triggers,
    pub action: String,
    #[serde(default)]
    pub description: String,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Triggers {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub required: bool,
}

impl WorkflowDefinition {
    /// Parse and validate a `workflow.yml` document.
    pub fn parse(raw: &str) -> Result<Self, DdxError> {
        let def: WorkflowDefinition = serde_yaml::from_str(raw)
            .map_err(|e| ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "malformed workflow definition").with_cause(e.into()))?;
        def.validate()?;
        Ok(def)
    }

    fn validate(&self) -> Result<(), DdxError> {
        if self.phases.is_empty() {
            return Ok(());
        }
        let mut last_order: Option<u32> = None;
        for phase in &self.phases {
            if let Some(prev) = last_order {
                if phase.order <= prev {
                    return Err(ddx_err!(
                        ErrorCode::ErrWorkflowDefinitionInvalid,
                        "phase '{}' has order {} which does not strictly increase from {}",
                        phase.id,
                        phase.order,
                        prev
                    ));
                }
            }
            last_order = Some(phase.order);
        }
        Ok(())
    }

    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// The phase that follows `id` in declaration order, or `None` if `id`
    /// is the last phase.
    pub fn next_phase(&self, id: &str) -> Option<&Phase> {
        let idx = self.phases.iter().position(|p| p.id == id)?;
        self.phases.get(idx + 1)
    }
}

/// Resolves and parses workflow definitions from a library root. Kept as a
/// trait so the router and the workflow engine can share one loading
/// contract and tests can substitute an in-memory fixture; implementations
/// may cache parsed definitions for the process lifetime.
pub trait WorkflowDefinitionLoader {
    fn load(&self, name: &str) -> Result<WorkflowDefinition, DdxError>;
}

/// Reads `<library>/workflows/<name>/workflow.yml` from disk on every call.
pub struct FsWorkflowDefinitionLoader {
    pub library_root: PathBuf,
}

impl FsWorkflowDefinitionLoader {
    pub fn new(library_root: PathBuf) -> Self {
        Self { library_root }
    }

    pub fn workflow_dir(&self, name: &str) -> PathBuf {
        self.library_root.join("workflows").join(name)
    }
}

impl WorkflowDefinitionLoader for FsWorkflowDefinitionLoader {
    fn load(&self, name: &str) -> Result<WorkflowDefinition, DdxError> {
        let path = self.workflow_dir(name).join("workflow.yml");
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "failed to read {:?}", path).with_cause(e.into())
        })?;
        WorkflowDefinition::parse(&raw)
    }
}

struct CacheEntry {
    mtime: SystemTime,
    definition: WorkflowDefinition,
}

/// Decorates any loader with an mtime-invalidated cache, valid for the
/// process lifetime. The cache is an explicit handle passed around by the
/// caller, not ambient global state.
pub struct CachingWorkflowDefinitionLoader<L: WorkflowDefinitionLoader> {
    inner: L,
    library_root: PathBuf,
    cache: RefCell<HashMap<String, CacheEntry>>,
}

impl<L: WorkflowDefinitionLoader> CachingWorkflowDefinitionLoader<L> {
    pub fn new(inner: L, library_root: PathBuf) -> Self {
        Self {
            inner,
            library_root,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn source_mtime(&self, name: &str) -> Option<SystemTime> {
        let path = self.library_root.join("workflows").join(name).join("workflow.yml");
        std::fs::metadata(path).ok()?.modified().ok()
    }
}

impl<L: WorkflowDefinitionLoader> WorkflowDefinitionLoader for CachingWorkflowDefinitionLoader<L> {
    fn load(&self, name: &str) -> Result<WorkflowDefinition, DdxError> {
        let current_mtime = self.source_mtime(name);
        if let (Some(mtime), Some(entry)) = (current_mtime, self.cache.borrow().get(name)) {
            if entry.mtime == mtime {
                return Ok(entry.definition.clone());
            }
        }

        let definition = self.inner.load(name)?;
        if let Some(mtime) = current_mtime {
            self.cache.borrow_mut().insert(
                name.to_string(),
                CacheEntry {
                    mtime,
                    definition: definition.clone(),
                },
            );
        }
        Ok(definition)
    }
}

/// An in-memory loader for tests: no filesystem access at all.
pub struct FakeWorkflowDefinitionLoader {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl FakeWorkflowDefinitionLoader {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    pub fn with(mut self, def: WorkflowDefinition) -> Self {
        self.definitions.insert(def.name.clone(), def);
        self
    }
}

impl Default for FakeWorkflowDefinitionLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowDefinitionLoader for FakeWorkflowDefinitionLoader {
    fn load(&self, name: &str) -> Result<WorkflowDefinition, DdxError> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "no definition for workflow '{}'", name))
    }
}

/// True iff `path` (relative to the project root) matches an artifact
/// criterion glob-free exact path, and the file exists and is non-empty.
pub fn artifact_satisfied(project_root: &Path, relative_path: &str) -> bool {
    let full = project_root.join(relative_path);
    match std::fs::metadata(&full) {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
name: helix
version: "1.0"
description: Frame-first delivery workflow
phases:
  - id: 01-frame
    order: 1
    name: Frame
    required_role: product-manager
    exit_criteria:
      - kind: artifact
        path: docs/helix/01-frame/prd.md
  - id: 02-design
    order: 2
    name: Design
    required_role: architect
    exit_criteria:
      - kind: predicate
        name: user-approved
agent_commands:
  request:
    enabled: true
    triggers:
      keywords: [add, implement]
      patterns: ["new feature"]
    action: frame-request
    description: Route a feature request into the frame phase
"#
    }

    #[test]
    fn parses_valid_definition() {
        let def = WorkflowDefinition::parse(sample_yaml()).unwrap();
        assert_eq!(def.name, "helix");
        assert_eq!(def.phases.len(), 2);
        assert_eq!(def.phases[0].exit_criteria[0].label(), "docs/helix/01-frame/prd.md");
    }

    #[test]
    fn rejects_non_increasing_order() {
        let bad = sample_yaml().replace("order: 2", "order: 1");
        let err = WorkflowDefinition::parse(&bad).unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrWorkflowDefinitionInvalid);
    }

    #[test]
    fn next_phase_walks_declaration_order() {
        let def = WorkflowDefinition::parse(sample_yaml()).unwrap();
        assert_eq!(def.next_phase("01-frame").unwrap().id, "02-design");
        assert!(def.next_phase("02-design").is_none());
    }

    #[test]
    fn caching_loader_reuses_until_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let workflow_dir = dir.path().join("workflows").join("helix");
        std::fs::create_dir_all(&workflow_dir).unwrap();
        std::fs::write(workflow_dir.join("workflow.yml"), sample_yaml()).unwrap();

        let loader = CachingWorkflowDefinitionLoader::new(
            FsWorkflowDefinitionLoader::new(dir.path().to_path_buf()),
            dir.path().to_path_buf(),
        );
        let first = loader.load("helix").unwrap();
        let second = loader.load("helix").unwrap();
        assert_eq!(first, second);
    }
}
