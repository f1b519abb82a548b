//! The Workflow Execution Engine (spec §4.E): instantiate a workflow,
//! track phase progress, evaluate gates, dispatch actions, maintain the
//! audit log, checkpoint and restore.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ddx_err, DdxError, ErrorCode};
use crate::library::{Library, Persona, WorkflowDefinitionLoader};
use crate::paths::{atomic_write, workflow_archive_dir, workflow_instance_dir, FileLock};

use super::audit::{self, AuditLog};
use super::checkpoint;
use super::gates::{self, UnmetReason};
use super::state::{WorkflowHeader, WorkflowState, WorkflowStatus};

pub struct Engine<'a> {
    pub project_root: PathBuf,
    pub library: &'a Library,
}

/// The result of `Advance`: either the phase id that started running, or
/// why none could.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceResult {
    Started(String),
    Blocked(Vec<UnmetReason>),
    AlreadyComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteResult {
    Completed(String),
    Unmet(Vec<UnmetReason>),
}

/// What `ExecuteAction` hands back to the (out-of-scope) AI host: the
/// action prompt text and the metadata it needs, verbatim per spec §9
/// ("Coordinator/enforcer prose is data").
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub workflow: String,
    pub phase: String,
    pub action: String,
    pub description: String,
    pub coordinator: String,
    pub enforcer: String,
    pub persona: Option<Persona>,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub workflow: String,
    pub instance_id: String,
    pub current_phase: String,
    pub workflow_status: WorkflowStatus,
    pub phases_completed: usize,
    pub phases_total: usize,
}

impl<'a> Engine<'a> {
    pub fn new(project_root: PathBuf, library: &'a Library) -> Self {
        Self { project_root, library }
    }

    fn state_path(&self, workflow_name: &str) -> PathBuf {
        workflow_instance_dir(&self.project_root, workflow_name).join("state.yml")
    }

    fn lock_path(&self, workflow_name: &str) -> PathBuf {
        workflow_instance_dir(&self.project_root, workflow_name).join(".state.lock")
    }

    fn acquire_lock(&self, workflow_name: &str) -> Result<FileLock, DdxError> {
        FileLock::acquire(self.lock_path(workflow_name))
            .map_err(|_| ddx_err!(ErrorCode::ErrConcurrentMutation, "workflow '{}' state is locked by another process", workflow_name))
    }

    fn audit_log(&self, workflow_name: &str) -> Result<AuditLog, DdxError> {
        AuditLog::open(audit::audit_log_path(&self.project_root, workflow_name))
    }

    pub fn load_state(&self, workflow_name: &str) -> Result<WorkflowState, DdxError> {
        let path = self.state_path(workflow_name);
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| ddx_err!(ErrorCode::ErrWorkflowNotActive, "no active instance for workflow '{}'", workflow_name))?;
        let mut state: WorkflowState = serde_yaml::from_str(&raw)
            .map_err(|e| ddx_err!(ErrorCode::ErrStateCorrupt, "malformed workflow state").with_cause(e.into()))?;
        if self.reconcile(workflow_name, &mut state)? {
            self.save_state(workflow_name, &state)?;
        }
        Ok(state)
    }

    /// Catches the state file up to the audit log after a crash between
    /// the log write and the state-file commit (spec §7 crash safety:
    /// "the log write precedes the state-file commit ... on next start
    /// the engine reconciles by reading the last log record"). The log
    /// is always written first, so its last record is the source of
    /// truth for whatever transition may not have made it to disk.
    fn reconcile(&self, workflow_name: &str, state: &mut WorkflowState) -> Result<bool, DdxError> {
        let audit = self.audit_log(workflow_name)?;
        let Some(last) = audit.last_record()? else {
            return Ok(false);
        };
        match last.event.as_str() {
            "phase.started" => {
                if let Some(phase_id) = &last.phase {
                    let pending = state.phase(phase_id).map(|p| p.status == super::state::PhaseStatus::Pending).unwrap_or(false);
                    if pending {
                        state.begin_phase(phase_id, last.ts)?;
                        return Ok(true);
                    }
                }
            }
            "phase.completed" => {
                if let Some(phase_id) = &last.phase {
                    let running = state.phase(phase_id).map(|p| p.status == super::state::PhaseStatus::Running).unwrap_or(false);
                    if running {
                        let definition = self.library.load_workflow(workflow_name)?;
                        let next_phase = definition.next_phase(phase_id).map(|p| p.id.clone());
                        state.complete_phase(phase_id, last.ts, next_phase.as_deref())?;
                        return Ok(true);
                    }
                }
            }
            "workflow.abandoned" => {
                if state.status.workflow_status != WorkflowStatus::Abandoned {
                    state.abandon(last.ts);
                    return Ok(true);
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn save_state(&self, workflow_name: &str, state: &WorkflowState) -> Result<(), DdxError> {
        let serialized = serde_yaml::to_string(state)
            .map_err(|e| ddx_err!(ErrorCode::ErrStateCorrupt, "failed to serialize workflow state").with_cause(e.into()))?;
        atomic_write(&self.state_path(workflow_name), serialized.as_bytes())
    }

    /// `InitInstance(name, source) -> InstanceID`.
    pub fn init_instance(&self, workflow_name: &str) -> Result<String, DdxError> {
        let definition = self.library.load_workflow(workflow_name)?;
        let instance_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let header = WorkflowHeader {
            name: definition.name.clone(),
            version: definition.version.clone(),
            source: self.library.root.display().to_string(),
            instance_id: instance_id.clone(),
            started_at: now,
        };
        let phase_ids: Vec<String> = definition.phases.iter().map(|p| p.id.clone()).collect();
        let state = WorkflowState::new(header, &phase_ids, now);

        self.audit_log(workflow_name)?.append(&audit::record("ddx", "workflow.initialized", None))?;
        self.save_state(workflow_name, &state)?;
        info!(workflow = %workflow_name, instance = %instance_id, "workflow instance initialized");
        Ok(instance_id)
    }

    /// `Advance() -> PhaseID | Blocked{reasons}`.
    pub fn advance(&self, workflow_name: &str) -> Result<AdvanceResult, DdxError> {
        let _lock = self.acquire_lock(workflow_name)?;
        let mut state = self.load_state(workflow_name)?;
        let definition = self.library.load_workflow(workflow_name)?;

        if state.status.workflow_status == WorkflowStatus::Completed {
            return Ok(AdvanceResult::AlreadyComplete);
        }

        let next = definition
            .phases
            .iter()
            .find(|p| state.phase(&p.id).map(|s| s.status == super::state::PhaseStatus::Pending).unwrap_or(false));
        let Some(next_phase) = next else {
            return Ok(AdvanceResult::AlreadyComplete);
        };

        // Input gate: the phase preceding `next_phase` in declaration
        // order must be completed (or there is none).
        let idx = definition.phases.iter().position(|p| p.id == next_phase.id).unwrap_or(0);
        if idx > 0 {
            let previous = &definition.phases[idx - 1];
            let previous_completed = state
                .phase(&previous.id)
                .map(|s| s.status == super::state::PhaseStatus::Completed)
                .unwrap_or(false);
            if !previous_completed {
                return Ok(AdvanceResult::Blocked(vec![UnmetReason(format!("phase-incomplete: {}", previous.id))]));
            }
        }

        state.begin_phase(&next_phase.id, Utc::now())?;
        self.audit_log(workflow_name)?
            .append(&audit::record("ddx", "phase.started", Some(&next_phase.id)))?;
        self.save_state(workflow_name, &state)?;
        Ok(AdvanceResult::Started(next_phase.id.clone()))
    }

    /// `ExecuteAction(subcommand, args) -> ActionResult`. Does not execute
    /// AI itself (spec §4.E).
    pub fn execute_action(&self, workflow_name: &str, subcommand: &str, config: &Config) -> Result<ActionResult, DdxError> {
        let state = self.load_state(workflow_name)?;
        let definition = self.library.load_workflow(workflow_name)?;

        let command = definition
            .agent_commands
            .get(subcommand)
            .ok_or_else(|| ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "no such action '{}'", subcommand))?;

        let current_phase_id = &state.status.current_phase;
        let phase_def = definition
            .phase(current_phase_id)
            .ok_or_else(|| ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "unknown current phase '{}'", current_phase_id))?;

        let coordinator = self.library.coordinator(workflow_name).unwrap_or_default();
        let enforcer = self.library.enforcer(workflow_name, current_phase_id).unwrap_or_default();

        let persona = config
            .personas
            .resolve(workflow_name, &phase_def.required_role)
            .and_then(|name| self.library.load_persona(name).ok());

        self.audit_log(workflow_name)?
            .append(&audit::AuditRecord {
                action: Some(subcommand.to_string()),
                ..audit::record("ddx", "action.dispatched", Some(current_phase_id))
            })?;

        Ok(ActionResult {
            workflow: workflow_name.to_string(),
            phase: current_phase_id.clone(),
            action: command.action.clone(),
            description: command.description.clone(),
            coordinator,
            enforcer,
            persona,
        })
    }

    /// `CompletePhase() -> PhaseID | Unmet{criteria}`.
    pub fn complete_phase(&self, workflow_name: &str) -> Result<CompleteResult, DdxError> {
        let _lock = self.acquire_lock(workflow_name)?;
        let mut state = self.load_state(workflow_name)?;
        let definition = self.library.load_workflow(workflow_name)?;

        let current_phase_id = state.status.current_phase.clone();
        let phase_def = definition
            .phase(&current_phase_id)
            .ok_or_else(|| ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "unknown current phase '{}'", current_phase_id))?;

        let audit = self.audit_log(workflow_name)?;
        let unmet = gates::evaluate(&phase_def.exit_criteria, &self.project_root, &current_phase_id, &audit);
        if !unmet.is_empty() {
            audit.append(&audit::record("ddx", "phase.gate_failed", Some(&current_phase_id)))?;
            return Ok(CompleteResult::Unmet(unmet));
        }

        let next_phase = definition.next_phase(&current_phase_id).map(|p| p.id.as_str());
        state.complete_phase(&current_phase_id, Utc::now(), next_phase)?;

        let checkpoint_id = checkpoint::create(&self.project_root, workflow_name, &self.state_path(workflow_name), &Utc::now().format("%Y%m%d%H%M%S").to_string())
            .unwrap_or_default();
        if !checkpoint_id.is_empty() {
            state.status.last_checkpoint = Some(checkpoint_id);
        }

        audit.append(&audit::record("ddx", "phase.completed", Some(&current_phase_id)))?;
        self.save_state(workflow_name, &state)?;

        if state.status.workflow_status == WorkflowStatus::Completed {
            self.archive(workflow_name)?;
        }

        Ok(CompleteResult::Completed(current_phase_id))
    }

    /// `Status() -> StatusReport`, read-only.
    pub fn status(&self, workflow_name: &str) -> Result<StatusReport, DdxError> {
        let state = self.load_state(workflow_name)?;
        let completed = state.phases.iter().filter(|p| p.status == super::state::PhaseStatus::Completed).count();
        Ok(StatusReport {
            workflow: state.workflow.name.clone(),
            instance_id: state.workflow.instance_id.clone(),
            current_phase: state.status.current_phase.clone(),
            workflow_status: state.status.workflow_status,
            phases_completed: completed,
            phases_total: state.phases.len(),
        })
    }

    /// `Checkpoint() -> CheckpointID`.
    pub fn checkpoint(&self, workflow_name: &str) -> Result<String, DdxError> {
        let mut state = self.load_state(workflow_name)?;
        let ts = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let id = checkpoint::create(&self.project_root, workflow_name, &self.state_path(workflow_name), &ts)?;
        state.status.last_checkpoint = Some(id.clone());
        self.audit_log(workflow_name)?
            .append(&audit::AuditRecord {
                extra: [("checkpoint".to_string(), serde_json::Value::String(id.clone()))].into_iter().collect(),
                ..audit::record("ddx", "workflow.checkpoint_created", None)
            })?;
        self.save_state(workflow_name, &state)?;
        Ok(id)
    }

    /// `Restore(CheckpointID) -> error`.
    pub fn restore(&self, workflow_name: &str, checkpoint_id: &str) -> Result<(), DdxError> {
        let _lock = self.acquire_lock(workflow_name)?;
        checkpoint::restore(&self.project_root, workflow_name, checkpoint_id, &self.state_path(workflow_name))?;

        let mut state = self.load_state(workflow_name)?;
        state.restore_marker(Utc::now(), checkpoint_id);
        self.audit_log(workflow_name)?.append(&audit::record("ddx", "workflow.restored", None))?;
        self.save_state(workflow_name, &state)?;
        Ok(())
    }

    /// `Abandon(reason)`.
    pub fn abandon(&self, workflow_name: &str, reason: &str) -> Result<(), DdxError> {
        let _lock = self.acquire_lock(workflow_name)?;
        let mut state = self.load_state(workflow_name)?;
        state.abandon(Utc::now());
        self.audit_log(workflow_name)?
            .append(&audit::AuditRecord {
                extra: [("reason".to_string(), serde_json::Value::String(reason.to_string()))].into_iter().collect(),
                ..audit::record("ddx", "workflow.abandoned", None)
            })?;
        self.save_state(workflow_name, &state)?;
        self.archive(workflow_name)
    }

    /// Moves an instance directory to `archive/<instance_id>/` (spec §3
    /// "moved to archive on completed or abandoned").
    fn archive(&self, workflow_name: &str) -> Result<(), DdxError> {
        let state = self.load_state(workflow_name)?;
        let from = workflow_instance_dir(&self.project_root, workflow_name);
        let to = workflow_archive_dir(&self.project_root).join(&state.workflow.instance_id);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to create {:?}", parent).with_cause(e.into()))?;
        }
        std::fs::rename(&from, &to).map_err(|e| ddx_err!(ErrorCode::ErrIo, "failed to archive {:?}", from).with_cause(e.into()))?;
        Ok(())
    }

    /// Explicit skip is not supported (spec §9 Open Question 2).
    pub fn skip_phase(&self, _workflow_name: &str) -> Result<(), DdxError> {
        Err(ddx_err!(ErrorCode::ErrPhaseSkipNotSupported, "phase skip is not supported"))
    }
}

pub fn artifact_reason_paths(reasons: &[UnmetReason]) -> Vec<&str> {
    reasons.iter().map(|r| r.0.as_str()).collect()
}

pub fn instance_dir(project_root: &Path, workflow_name: &str) -> PathBuf {
    workflow_instance_dir(project_root, workflow_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{AgentCommand, ExitCriterion, Phase, Triggers, WorkflowDefinition};
    use tempfile::tempdir;

    fn build_library(dir: &Path) -> Library {
        let workflow_dir = dir.join("library").join("workflows").join("helix");
        std::fs::create_dir_all(workflow_dir.join("phases").join("01-frame")).unwrap();
        std::fs::create_dir_all(workflow_dir.join("phases").join("02-design")).unwrap();
        std::fs::write(workflow_dir.join("coordinator.md"), "Coordinator text.").unwrap();
        std::fs::write(workflow_dir.join("phases").join("01-frame").join("enforcer.md"), "Enforce frame.").unwrap();
        std::fs::write(workflow_dir.join("phases").join("02-design").join("enforcer.md"), "Enforce design.").unwrap();

        let def = WorkflowDefinition {
            name: "helix".to_string(),
            version: "1.0".to_string(),
            description: String::new(),
            coordinator: Some("coordinator.md".to_string()),
            tags: Vec::new(),
            phases: vec![
                Phase {
                    id: "01-frame".to_string(),
                    order: 1,
                    name: "Frame".to_string(),
                    description: String::new(),
                    required_role: "product-manager".to_string(),
                    exit_criteria: vec![ExitCriterion::Artifact {
                        path: "docs/helix/01-frame/prd.md".to_string(),
                    }],
                    estimated_duration: None,
                },
                Phase {
                    id: "02-design".to_string(),
                    order: 2,
                    name: "Design".to_string(),
                    description: String::new(),
                    required_role: "architect".to_string(),
                    exit_criteria: Vec::new(),
                    estimated_duration: None,
                },
            ],
            agent_commands: {
                let mut m = std::collections::HashMap::new();
                m.insert(
                    "frame-request".to_string(),
                    AgentCommand {
                        enabled: true,
                        triggers: Triggers::default(),
                        action: "frame-request".to_string(),
                        description: "Frame a request".to_string(),
                    },
                );
                m
            },
            variables: Vec::new(),
        };
        std::fs::write(workflow_dir.join("workflow.yml"), serde_yaml::to_string(&def).unwrap()).unwrap();

        Library::new(dir.join("library"))
    }

    #[test]
    fn init_advance_and_gate_block_then_complete() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        let engine = Engine::new(dir.path().to_path_buf(), &library);

        engine.init_instance("helix").unwrap();
        let advance = engine.advance("helix").unwrap();
        assert_eq!(advance, AdvanceResult::Started("01-frame".to_string()));

        let blocked = engine.complete_phase("helix").unwrap();
        match blocked {
            CompleteResult::Unmet(reasons) => {
                assert_eq!(reasons[0].0, "artifact-missing: docs/helix/01-frame/prd.md");
            }
            _ => panic!("expected Unmet"),
        }

        let state_before = std::fs::read_to_string(engine.state_path("helix")).unwrap();
        // gate failure must not mutate state
        assert_eq!(std::fs::read_to_string(engine.state_path("helix")).unwrap(), state_before);

        std::fs::create_dir_all(dir.path().join("docs/helix/01-frame")).unwrap();
        std::fs::write(dir.path().join("docs/helix/01-frame/prd.md"), "PRD content").unwrap();

        let completed = engine.complete_phase("helix").unwrap();
        assert_eq!(completed, CompleteResult::Completed("01-frame".to_string()));

        let status = engine.status("helix").unwrap();
        assert_eq!(status.current_phase, "02-design");
        assert_eq!(status.phases_completed, 1);
    }

    #[test]
    fn execute_action_returns_enforcer_and_coordinator() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        let engine = Engine::new(dir.path().to_path_buf(), &library);
        engine.init_instance("helix").unwrap();
        engine.advance("helix").unwrap();

        let config = Config::default();
        let result = engine.execute_action("helix", "frame-request", &config).unwrap();
        assert_eq!(result.coordinator, "Coordinator text.");
        assert_eq!(result.enforcer, "Enforce frame.");
    }

    #[test]
    fn abandon_moves_instance_to_archive() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        let engine = Engine::new(dir.path().to_path_buf(), &library);
        engine.init_instance("helix").unwrap();
        engine.abandon("helix", "no longer needed").unwrap();

        assert!(engine.load_state("helix").is_err());
        assert!(workflow_archive_dir(dir.path()).read_dir().unwrap().next().is_some());
    }

    #[test]
    fn restore_replays_checkpoint_and_appends_transition() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        let engine = Engine::new(dir.path().to_path_buf(), &library);
        engine.init_instance("helix").unwrap();
        let id = engine.checkpoint("helix").unwrap();

        engine.advance("helix").unwrap();
        engine.restore("helix", &id).unwrap();

        let state = engine.load_state("helix").unwrap();
        assert_eq!(state.transitions.last().unwrap().to, "restored");
    }

    #[test]
    fn load_state_reconciles_phase_started_logged_but_not_committed() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        let engine = Engine::new(dir.path().to_path_buf(), &library);
        engine.init_instance("helix").unwrap();

        // Simulate a crash between the audit-log write and the state-file
        // commit in `advance`: the log records the transition, but the
        // on-disk state still shows the phase pending.
        engine
            .audit_log("helix")
            .unwrap()
            .append(&audit::record("ddx", "phase.started", Some("01-frame")))
            .unwrap();

        let state = engine.load_state("helix").unwrap();
        assert_eq!(state.phase("01-frame").unwrap().status, super::state::PhaseStatus::Running);
        assert_eq!(state.status.current_phase, "01-frame");

        // The reconciliation itself is persisted, not just returned in memory.
        let reloaded = engine.load_state("helix").unwrap();
        assert_eq!(reloaded.phase("01-frame").unwrap().status, super::state::PhaseStatus::Running);
    }

    #[test]
    fn load_state_reconciles_phase_completed_logged_but_not_committed() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        let engine = Engine::new(dir.path().to_path_buf(), &library);
        engine.init_instance("helix").unwrap();
        engine.advance("helix").unwrap();

        engine
            .audit_log("helix")
            .unwrap()
            .append(&audit::record("ddx", "phase.completed", Some("01-frame")))
            .unwrap();

        let state = engine.load_state("helix").unwrap();
        assert_eq!(state.phase("01-frame").unwrap().status, super::state::PhaseStatus::Completed);
        assert_eq!(state.status.current_phase, "02-design");
    }
}
