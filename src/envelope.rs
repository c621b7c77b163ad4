//! Context envelopes - the isolated state passed between workers

use serde::{Deserialize, Serialize};

use crate::retry::AttemptRecord;
use crate::task::TaskId;

/// One worker's contribution to a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Task the worker handled
    pub task_id: TaskId,
    /// Worker that produced the output
    pub worker: String,
    pub output: String,
    /// Attempts used, including the successful one
    pub attempts: u32,
    /// Failed attempts that preceded the output
    pub failures: Vec<AttemptRecord>,
    /// Set when the output came from an escalation target
    pub escalated_from: Option<String>,
}

/// Accumulated task state.
///
/// Append-only. Fan-out branches each get their own clone, so no two
/// workers ever share one envelope; merging builds a new envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEnvelope {
    task_id: TaskId,
    trace: Vec<TraceEntry>,
    notes: Vec<String>,
}

impl ContextEnvelope {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            trace: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Output of the most recent stage
    pub fn last_output(&self) -> Option<&str> {
        self.trace.last().map(|e| e.output.as_str())
    }

    pub fn push(&mut self, entry: TraceEntry) {
        self.trace.push(entry);
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Consume and extend, for pipeline hand-off
    pub fn extended(mut self, entry: TraceEntry) -> Self {
        self.push(entry);
        self
    }

    /// Copy for a fan-out branch, scoped to the branch's task
    pub fn fork(&self, task_id: TaskId) -> Self {
        Self {
            task_id,
            trace: self.trace.clone(),
            notes: self.notes.clone(),
        }
    }

    /// Read-only join of branch envelopes.
    ///
    /// The parent's own trace comes first; each branch then contributes
    /// only the entries it appended after forking, in branch order.
    pub fn merge<'a>(
        parent: &ContextEnvelope,
        branches: impl IntoIterator<Item = &'a ContextEnvelope>,
    ) -> ContextEnvelope {
        let base_trace = parent.trace.len();
        let base_notes = parent.notes.len();
        let mut merged = parent.clone();

        for branch in branches {
            merged
                .trace
                .extend(branch.trace.iter().skip(base_trace).cloned());
            merged
                .notes
                .extend(branch.notes.iter().skip(base_notes).cloned());
        }

        merged
    }

    pub fn len(&self) -> usize {
        self.trace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace.is_empty()
    }
}
