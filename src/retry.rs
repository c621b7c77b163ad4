//! Retry / escalation manager
//!
//! Wraps a single worker invocation in a bounded retry loop:
//!
//! ```text
//!            success
//! Attempting ───────────────────────────────▶ Succeeded
//!    │  ▲
//!    │  │ recoverable, attempts < max
//!    │  └──────── RetryPending
//!    │
//!    │ recoverable at max, or conceptual blocker
//!    ▼                 target succeeds
//! Escalated ─────────────────────────────────▶ Succeeded
//!    │ target fails
//!    ▼
//!  Failed
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::envelope::{ContextEnvelope, TraceEntry};
use crate::error::{CadreError, FailureCategory};
use crate::events::EngineEvent;
use crate::invoker::{WorkerInvoker, WorkerOutcome};
use crate::registry::WorkerRegistry;
use crate::safety::SafetyGate;
use crate::session::Session;
use crate::task::{Task, TaskId};
use crate::worker::WorkerHandle;

/// States of one worker invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Attempting,
    Succeeded,
    RetryPending,
    Escalated,
    Failed,
}

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub approach: String,
    /// SHA-256 of the trimmed approach text, hex encoded
    pub approach_hash: String,
    pub failure: FailureCategory,
    pub detail: String,
}

/// Hash used to detect resubmitted approaches
pub fn approach_hash(approach: &str) -> String {
    hex::encode(Sha256::digest(approach.trim().as_bytes()))
}

/// Retry bookkeeping for one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryState {
    max_attempts: u32,
    attempts: u32,
    last_failure: Option<FailureCategory>,
    history: Vec<AttemptRecord>,
    state: InvocationState,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: 0,
            last_failure: None,
            history: Vec::new(),
            state: InvocationState::Attempting,
        }
    }

    /// Single-attempt state carrying the escalated history
    pub fn for_escalation(record: &EscalationRecord) -> Self {
        Self {
            history: record.attempts.clone(),
            last_failure: record.attempts.last().map(|a| a.failure),
            ..Self::new(1)
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn last_failure(&self) -> Option<FailureCategory> {
        self.last_failure
    }

    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Whether an approach already failed
    pub fn has_tried(&self, approach: &str) -> bool {
        let hash = approach_hash(approach);
        self.history.iter().any(|a| a.approach_hash == hash)
    }

    /// Enter `Attempting`; returns the attempt number
    fn begin_attempt(&mut self) -> u32 {
        debug_assert!(!self.is_exhausted());
        self.attempts += 1;
        self.state = InvocationState::Attempting;
        self.attempts
    }

    /// Record a failure. Returns true when the approach repeats an earlier one.
    fn record_failure(
        &mut self,
        failure: FailureCategory,
        approach: &str,
        detail: &str,
    ) -> bool {
        let hash = approach_hash(approach);
        let repeated = self.history.iter().any(|a| a.approach_hash == hash);
        self.history.push(AttemptRecord {
            attempt: self.attempts,
            approach: approach.to_string(),
            approach_hash: hash,
            failure,
            detail: detail.to_string(),
        });
        self.last_failure = Some(failure);
        repeated
    }

    fn transition(&mut self, state: InvocationState) {
        self.state = state;
    }
}

/// Hand-off from a failing worker to a higher authority. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub originating_worker: String,
    pub task_id: TaskId,
    pub task_summary: String,
    /// Every failed attempt, in order
    pub attempts: Vec<AttemptRecord>,
    /// `None` when no target is configured
    pub target: Option<String>,
}

impl EscalationRecord {
    fn new(worker: &str, task: &Task, state: &RetryState, target: Option<&WorkerHandle>) -> Self {
        Self {
            originating_worker: worker.to_string(),
            task_id: task.id,
            task_summary: task.summary().to_string(),
            attempts: state.history.clone(),
            target: target.map(|t| t.name.clone()),
        }
    }

    /// One-line description for envelope notes
    pub fn summary(&self) -> String {
        let tried: Vec<_> = self
            .attempts
            .iter()
            .map(|a| format!("#{} {} ({})", a.attempt, a.approach, a.failure))
            .collect();
        format!(
            "escalated from {} after {} attempt(s): {}",
            self.originating_worker,
            self.attempts.len(),
            tried.join("; ")
        )
    }
}

/// How an escalation was resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationResolution {
    /// An escalation target produced output
    Resolved { worker: String, output: String },
    /// No target configured; human judgment required
    AwaitingHuman,
}

/// Terminal result of one managed invocation
#[derive(Debug)]
pub enum InvocationOutcome {
    Succeeded(TraceEntry),
    Escalated {
        record: EscalationRecord,
        resolution: EscalationResolution,
        /// Present when a target resolved the escalation
        entry: Option<TraceEntry>,
    },
    Failed {
        error: CadreError,
        history: Vec<AttemptRecord>,
    },
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Runs worker invocations under the retry/escalation policy
#[derive(Clone)]
pub struct RetryManager {
    max_attempts: u32,
    max_escalation_depth: usize,
    default_deadline: Duration,
    registry: Arc<WorkerRegistry>,
    invoker: Arc<dyn WorkerInvoker>,
    gate: SafetyGate,
    mutation_lock: Arc<Mutex<()>>,
}

impl RetryManager {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        invoker: Arc<dyn WorkerInvoker>,
        max_attempts: u32,
        max_escalation_depth: usize,
        default_deadline: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_escalation_depth,
            default_deadline,
            registry,
            invoker,
            gate: SafetyGate::new(),
            mutation_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Invoke `worker` for `task` until it succeeds, escalates or fails
    #[instrument(skip_all, fields(worker = %worker.name, task_id = %task.id))]
    pub async fn run(
        &self,
        session: &Session,
        worker: &WorkerHandle,
        task: &Task,
        envelope: &ContextEnvelope,
    ) -> InvocationOutcome {
        let mut state = RetryState::new(self.max_attempts);
        let mut working = envelope.clone();

        loop {
            let attempt = state.begin_attempt();
            session.emit(EngineEvent::AttemptStarted {
                submission_id: session.id,
                task_id: task.id,
                worker: worker.name.clone(),
                attempt,
            });

            let outcome = self.invoke_once(session, worker, task, &working, &state).await;
            let (category, approach, detail) = match outcome {
                WorkerOutcome::Success { output } => {
                    state.transition(InvocationState::Succeeded);
                    info!(attempt, "Worker succeeded");
                    return InvocationOutcome::Succeeded(TraceEntry {
                        task_id: task.id,
                        worker: worker.name.clone(),
                        output,
                        attempts: state.attempts,
                        failures: state.history,
                        escalated_from: None,
                    });
                }
                WorkerOutcome::RecoverableFailure {
                    category,
                    approach,
                    detail,
                } => (category, approach, detail),
                WorkerOutcome::ConceptualBlocker { approach, detail } => {
                    (FailureCategory::ConceptualBlocker, approach, detail)
                }
            };

            let repeated = state.record_failure(category, &approach, &detail);
            let hash = approach_hash(&approach);
            warn!(attempt, %category, detail = %detail, "Worker attempt failed");
            session.emit(EngineEvent::AttemptFailed {
                submission_id: session.id,
                task_id: task.id,
                worker: worker.name.clone(),
                attempt,
                category,
                approach_hash: hash.clone(),
            });

            if !category.is_recoverable() || state.is_exhausted() {
                state.transition(InvocationState::Escalated);
                return self.escalate(session, worker, task, &working, &state).await;
            }

            if repeated {
                state.transition(InvocationState::Failed);
                warn!(attempt, approach_hash = %hash, "Rejecting repeated approach");
                return InvocationOutcome::Failed {
                    error: CadreError::RepeatedApproach {
                        worker: worker.name.clone(),
                        attempt,
                        approach_hash: hash,
                    },
                    history: state.history,
                };
            }

            state.transition(InvocationState::RetryPending);
            working.note(format!(
                "approach already tried by {} (attempt {attempt}, {category}), do not repeat: {approach}",
                worker.name
            ));
            debug!(next_attempt = attempt + 1, "Retry pending");
        }
    }

    /// Hand the failure to the escalation chain, one attempt per hop
    async fn escalate(
        &self,
        session: &Session,
        worker: &WorkerHandle,
        task: &Task,
        envelope: &ContextEnvelope,
        state: &RetryState,
    ) -> InvocationOutcome {
        let chain = self
            .registry
            .escalation_chain(&worker.name, self.max_escalation_depth);
        let record = EscalationRecord::new(&worker.name, task, state, chain.first());

        info!(
            escalation_target = ?record.target,
            attempts = record.attempts.len(),
            "Escalating"
        );
        session.emit(EngineEvent::EscalationRaised {
            submission_id: session.id,
            task_id: task.id,
            from: worker.name.clone(),
            target: record.target.clone(),
            attempts: record.attempts.len(),
        });

        if chain.is_empty() {
            return InvocationOutcome::Escalated {
                record,
                resolution: EscalationResolution::AwaitingHuman,
                entry: None,
            };
        }

        let mut working = envelope.clone();
        working.note(record.summary());
        let mut reason = String::new();

        for (hop, target) in chain.iter().enumerate() {
            if target.mutates_state {
                let decision =
                    self.gate
                        .evaluate(task, session.environment(), session.confirmation());
                if !decision.proceeds() {
                    reason = format!("{} blocked by safety gate: {}", target.name, decision.resolution);
                    break;
                }
            }

            let mut target_state = RetryState::for_escalation(&record);
            target_state.begin_attempt();

            let outcome = self
                .invoke_once(session, target, task, &working, &target_state)
                .await;
            match outcome {
                WorkerOutcome::Success { output } => {
                    info!(resolver = %target.name, hop, "Escalation resolved");
                    let entry = TraceEntry {
                        task_id: task.id,
                        worker: target.name.clone(),
                        output: output.clone(),
                        attempts: 1,
                        failures: record.attempts.clone(),
                        escalated_from: Some(worker.name.clone()),
                    };
                    return InvocationOutcome::Escalated {
                        resolution: EscalationResolution::Resolved {
                            worker: target.name.clone(),
                            output,
                        },
                        record,
                        entry: Some(entry),
                    };
                }
                WorkerOutcome::ConceptualBlocker { detail, .. } => {
                    warn!(resolver = %target.name, hop, "Escalation target needs higher judgment");
                    reason = format!("{} could not resolve: {detail}", target.name);
                    working.note(reason.clone());
                }
                WorkerOutcome::RecoverableFailure {
                    category, detail, ..
                } => {
                    reason = format!("{} failed with {category}: {detail}", target.name);
                    break;
                }
            }
        }

        warn!(reason = %reason, "Escalation exhausted");
        InvocationOutcome::Failed {
            history: record.attempts.clone(),
            error: CadreError::EscalationExhausted {
                record: Box::new(record),
                reason,
            },
        }
    }

    /// One bounded invocation. Timeouts and boundary errors become
    /// recoverable failures.
    async fn invoke_once(
        &self,
        session: &Session,
        worker: &WorkerHandle,
        task: &Task,
        envelope: &ContextEnvelope,
        state: &RetryState,
    ) -> WorkerOutcome {
        let deadline = task.deadline.unwrap_or(self.default_deadline);
        let attempt = state.attempts();

        // Mutating work on the shared project state never overlaps
        let _lock = if task.mutates_state && worker.mutates_state {
            Some(self.mutation_lock.lock().await)
        } else {
            None
        };

        session.record_invocation();
        let call = self.invoker.invoke(worker, envelope, task, state);

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => WorkerOutcome::failure(
                FailureCategory::ConfigurationError,
                format!("attempt {attempt}: invocation error"),
                e.to_string(),
            ),
            Err(_) => WorkerOutcome::failure(
                FailureCategory::Timeout,
                format!("attempt {attempt}: no result within {deadline:?}"),
                format!("{} exceeded its deadline", worker.name),
            ),
        }
    }
}
