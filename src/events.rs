//! Structured engine events

use serde::{Deserialize, Serialize};

use crate::error::FailureCategory;
use crate::safety::SafetyDecision;
use crate::task::{SubmissionId, TaskId, TopologyHint};

/// Events emitted while a submission runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    TaskSubmitted {
        submission_id: SubmissionId,
        task_id: TaskId,
        topology: TopologyHint,
        mutates_state: bool,
    },
    SafetyEvaluated {
        submission_id: SubmissionId,
        task_id: TaskId,
        decision: SafetyDecision,
    },
    WorkerRouted {
        submission_id: SubmissionId,
        task_id: TaskId,
        worker: String,
    },
    AttemptStarted {
        submission_id: SubmissionId,
        task_id: TaskId,
        worker: String,
        attempt: u32,
    },
    AttemptFailed {
        submission_id: SubmissionId,
        task_id: TaskId,
        worker: String,
        attempt: u32,
        category: FailureCategory,
        approach_hash: String,
    },
    EscalationRaised {
        submission_id: SubmissionId,
        task_id: TaskId,
        from: String,
        target: Option<String>,
        attempts: usize,
    },
    TaskFinished {
        submission_id: SubmissionId,
        outcome: String,
    },
}

impl EngineEvent {
    pub fn submission_id(&self) -> SubmissionId {
        match self {
            Self::TaskSubmitted { submission_id, .. }
            | Self::SafetyEvaluated { submission_id, .. }
            | Self::WorkerRouted { submission_id, .. }
            | Self::AttemptStarted { submission_id, .. }
            | Self::AttemptFailed { submission_id, .. }
            | Self::EscalationRaised { submission_id, .. }
            | Self::TaskFinished { submission_id, .. } => *submission_id,
        }
    }
}
