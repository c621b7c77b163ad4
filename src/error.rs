//! Cadre error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::EscalationRecord;
use crate::safety::SafetyDecision;
use crate::task::TaskId;

/// Errors that can occur in the orchestration runtime
#[derive(Debug, Error)]
pub enum CadreError {
    /// A worker with this name is already registered
    #[error("Duplicate worker: {0}")]
    DuplicateWorker(String),

    /// No registered worker is capable of the task
    #[error("No worker matches task {task_id}: {summary}")]
    NoMatch { task_id: TaskId, summary: String },

    /// Routing requires a safety confirmation first
    #[error("Routing to '{worker}' blocked: {}", .decision.resolution)]
    RoutingBlocked {
        worker: String,
        decision: SafetyDecision,
    },

    /// Another mutating task is already in flight
    #[error("Mutating task {in_flight} already in flight")]
    ConcurrentMutation { in_flight: TaskId },

    /// The escalation target itself failed
    #[error("Escalation from '{}' exhausted: {reason}", .record.originating_worker)]
    EscalationExhausted {
        record: Box<EscalationRecord>,
        reason: String,
    },

    /// A worker resubmitted an approach that already failed
    #[error("Worker '{worker}' repeated failed approach on attempt {attempt} ({approach_hash})")]
    RepeatedApproach {
        worker: String,
        attempt: u32,
        approach_hash: String,
    },

    /// A submitted graph contained no tasks
    #[error("Task graph is empty")]
    EmptyGraph,

    /// Worker definition could not be parsed or compiled
    #[error("Invalid worker definition: {0}")]
    InvalidDefinition(String),

    /// Escalation map names a worker that is not registered
    #[error("Unknown escalation target '{target}' for '{source_name}'")]
    UnknownEscalationTarget { source_name: String, target: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Environment query failed
    #[error("Environment error: {0}")]
    Environment(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadreError {
    /// Whether the error is a hard failure of an escalation target
    pub fn is_escalation_failure(&self) -> bool {
        matches!(self, Self::EscalationExhausted { .. })
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CadreError>;

/// Why a single worker attempt failed.
///
/// Everything except [`FailureCategory::ConceptualBlocker`] feeds the
/// bounded retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    BuildFailure,
    TestFailure,
    ConfigurationError,
    /// Invocation deadline elapsed
    Timeout,
    /// The worker asserts the problem needs higher judgment
    ConceptualBlocker,
}

impl FailureCategory {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ConceptualBlocker)
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BuildFailure => "build failure",
            Self::TestFailure => "test failure",
            Self::ConfigurationError => "configuration error",
            Self::Timeout => "timeout",
            Self::ConceptualBlocker => "conceptual blocker",
        };
        f.write_str(s)
    }
}
