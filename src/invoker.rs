//! Worker invocation boundary
//!
//! The engine never looks inside a worker. Persona prompts, model calls and
//! tool use all live behind [`WorkerInvoker`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::ContextEnvelope;
use crate::error::FailureCategory;
use crate::retry::RetryState;
use crate::task::Task;
use crate::worker::WorkerDescriptor;

/// Result of one worker attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Success {
        output: String,
    },
    /// Retryable failure; `approach` describes what was tried
    RecoverableFailure {
        category: FailureCategory,
        approach: String,
        detail: String,
    },
    /// The worker asserts higher judgment is needed
    ConceptualBlocker {
        approach: String,
        detail: String,
    },
}

impl WorkerOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self::Success {
            output: output.into(),
        }
    }

    pub fn failure(
        category: FailureCategory,
        approach: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        if category == FailureCategory::ConceptualBlocker {
            return Self::blocker(approach, detail);
        }
        Self::RecoverableFailure {
            category,
            approach: approach.into(),
            detail: detail.into(),
        }
    }

    pub fn blocker(approach: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConceptualBlocker {
            approach: approach.into(),
            detail: detail.into(),
        }
    }

    pub fn failure_category(&self) -> Option<FailureCategory> {
        match self {
            Self::Success { .. } => None,
            Self::RecoverableFailure { category, .. } => Some(*category),
            Self::ConceptualBlocker { .. } => Some(FailureCategory::ConceptualBlocker),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Executes a worker against an envelope.
///
/// An `Err` means the boundary itself broke (transport, spawn failure) and
/// is treated as a recoverable configuration error.
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    async fn invoke(
        &self,
        worker: &WorkerDescriptor,
        envelope: &ContextEnvelope,
        task: &Task,
        retry: &RetryState,
    ) -> anyhow::Result<WorkerOutcome>;
}
