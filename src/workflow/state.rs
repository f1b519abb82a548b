//! Workflow state persisted at
//! `.ddx/local/workflows/active/<name>/state.yml` (spec §3 "Workflow
//! State").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ddx_err, DdxError, ErrorCode};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Blocked,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowHeader {
    pub name: String,
    pub version: String,
    pub source: String,
    pub instance_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusBlock {
    pub current_phase: String,
    pub workflow_status: WorkflowStatus,
    pub last_checkpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseState {
    pub id: String,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub gates_passed: bool,
    #[serde(default)]
    pub exit_criteria_met: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl PhaseState {
    fn pending(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            gates_passed: false,
            exit_criteria_met: Vec::new(),
            artifacts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub workflow: WorkflowHeader,
    pub status: StatusBlock,
    pub phases: Vec<PhaseState>,
    #[serde(default)]
    pub variables: std::collections::HashMap<String, String>,
    /// Append-only. Never rewritten (spec §3 Invariant); enforced by
    /// `push_transition` being the only way to grow this list.
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

impl WorkflowState {
    pub fn new(header: WorkflowHeader, phase_ids: &[String], now: DateTime<Utc>) -> Self {
        let phases: Vec<PhaseState> = phase_ids.iter().map(|id| PhaseState::pending(id)).collect();
        let current_phase = phase_ids.first().cloned().unwrap_or_default();
        let initial_status = if phases.is_empty() { WorkflowStatus::Completed } else { WorkflowStatus::Pending };

        let mut state = Self {
            workflow: header,
            status: StatusBlock {
                current_phase,
                workflow_status: initial_status,
                last_checkpoint: None,
            },
            phases,
            variables: std::collections::HashMap::new(),
            transitions: Vec::new(),
        };
        state.push_transition(now, "none", &format!("{:?}", initial_status).to_lowercase(), None);
        state
    }

    /// The only way transitions grow: callers never truncate or edit
    /// `transitions` directly (spec testable property #2).
    pub fn push_transition(&mut self, timestamp: DateTime<Utc>, from: &str, to: &str, phase: Option<String>) {
        let clamped = match self.transitions.last() {
            Some(last) if timestamp <= last.timestamp => last.timestamp + chrono::Duration::milliseconds(1),
            _ => timestamp,
        };
        self.transitions.push(Transition {
            timestamp: clamped,
            from: from.to_string(),
            to: to.to_string(),
            phase,
        });
    }

    pub fn phase_mut(&mut self, id: &str) -> Option<&mut PhaseState> {
        self.phases.iter_mut().find(|p| p.id == id)
    }

    pub fn phase(&self, id: &str) -> Option<&PhaseState> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn running_phase(&self) -> Option<&PhaseState> {
        self.phases.iter().find(|p| p.status == PhaseStatus::Running)
    }

    /// `pending -> running`, spec §4.E phase transitions. Rejects a second
    /// concurrently-running phase (invariant: at most one `running`).
    pub fn begin_phase(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), DdxError> {
        if self.running_phase().is_some() {
            return Err(ddx_err!(ErrorCode::ErrConcurrentMutation, "another phase is already running"));
        }
        let phase = self
            .phase_mut(id)
            .ok_or_else(|| ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "unknown phase '{}'", id))?;
        if phase.status != PhaseStatus::Pending {
            return Err(ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "phase '{}' is not pending", id));
        }
        phase.status = PhaseStatus::Running;
        phase.started_at = Some(now);
        self.status.current_phase = id.to_string();
        self.status.workflow_status = WorkflowStatus::Running;
        self.push_transition(now, "pending", "running", Some(id.to_string()));
        Ok(())
    }

    /// `running -> completed`. Reverse transitions are unrepresentable:
    /// this never accepts an already-completed phase (spec §4.E "Reverse
    /// transitions are forbidden").
    pub fn complete_phase(&mut self, id: &str, now: DateTime<Utc>, next_phase: Option<&str>) -> Result<(), DdxError> {
        let phase = self
            .phase_mut(id)
            .ok_or_else(|| ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "unknown phase '{}'", id))?;
        if phase.status != PhaseStatus::Running {
            return Err(ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "phase '{}' is not running", id));
        }
        phase.status = PhaseStatus::Completed;
        phase.completed_at = Some(now);
        phase.gates_passed = true;

        self.push_transition(now, "running", "completed", Some(id.to_string()));

        match next_phase {
            Some(next) => self.status.current_phase = next.to_string(),
            None => {
                self.status.workflow_status = WorkflowStatus::Completed;
                self.push_transition(now, "running", "completed", None);
            }
        }
        Ok(())
    }

    /// `running -> failed`, causing workflow -> `blocked`.
    pub fn fail_phase(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), DdxError> {
        let phase = self
            .phase_mut(id)
            .ok_or_else(|| ddx_err!(ErrorCode::ErrWorkflowDefinitionInvalid, "unknown phase '{}'", id))?;
        phase.status = PhaseStatus::Failed;
        self.status.workflow_status = WorkflowStatus::Blocked;
        self.push_transition(now, "running", "failed", Some(id.to_string()));
        Ok(())
    }

    pub fn abandon(&mut self, now: DateTime<Utc>) {
        self.status.workflow_status = WorkflowStatus::Abandoned;
        self.push_transition(now, "*", "abandoned", None);
    }

    pub fn restore_marker(&mut self, now: DateTime<Utc>, checkpoint_id: &str) {
        self.push_transition(now, "*", "restored", None);
        self.status.last_checkpoint = Some(checkpoint_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> WorkflowHeader {
        WorkflowHeader {
            name: "helix".to_string(),
            version: "1.0".to_string(),
            source: "library".to_string(),
            instance_id: "inst-1".to_string(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn zero_phase_workflow_starts_completed() {
        let state = WorkflowState::new(header(), &[], Utc::now());
        assert_eq!(state.status.workflow_status, WorkflowStatus::Completed);
    }

    #[test]
    fn begin_then_complete_advances_current_phase() {
        let ids = vec!["01-frame".to_string(), "02-design".to_string()];
        let mut state = WorkflowState::new(header(), &ids, Utc::now());
        state.begin_phase("01-frame", Utc::now()).unwrap();
        state.complete_phase("01-frame", Utc::now(), Some("02-design")).unwrap();
        assert_eq!(state.status.current_phase, "02-design");
        assert_eq!(state.phase("01-frame").unwrap().status, PhaseStatus::Completed);
    }

    #[test]
    fn cannot_begin_second_concurrent_phase() {
        let ids = vec!["01-frame".to_string(), "02-design".to_string()];
        let mut state = WorkflowState::new(header(), &ids, Utc::now());
        state.begin_phase("01-frame", Utc::now()).unwrap();
        let err = state.begin_phase("02-design", Utc::now()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrConcurrentMutation);
    }

    #[test]
    fn transitions_are_append_only_and_monotonic() {
        let ids = vec!["01-frame".to_string()];
        let mut state = WorkflowState::new(header(), &ids, Utc::now());
        let t = state.transitions[0].timestamp;
        state.begin_phase("01-frame", t).unwrap();
        assert!(state.transitions[1].timestamp > t);
    }

    #[test]
    fn completing_last_phase_completes_workflow() {
        let ids = vec!["01-frame".to_string()];
        let mut state = WorkflowState::new(header(), &ids, Utc::now());
        state.begin_phase("01-frame", Utc::now()).unwrap();
        state.complete_phase("01-frame", Utc::now(), None).unwrap();
        assert_eq!(state.status.workflow_status, WorkflowStatus::Completed);
    }
}
