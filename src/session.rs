//! Per-submission run context

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::channel::EventSink;
use crate::error::{CadreError, Result};
use crate::events::EngineEvent;
use crate::safety::{Confirmation, EnvironmentSnapshot};
use crate::task::{SubmissionId, TaskId};

/// State shared by everything running on behalf of one submission.
///
/// The environment snapshot is captured once, so every gate evaluation in
/// the submission sees the same state.
#[derive(Debug)]
pub struct Session {
    /// Submission ID
    pub id: SubmissionId,
    environment: Option<EnvironmentSnapshot>,
    confirmation: Confirmation,
    events: EventSink,
    invocations: AtomicUsize,
    started: Instant,
}

impl Session {
    /// Create a new session
    pub fn new(
        environment: Option<EnvironmentSnapshot>,
        confirmation: Confirmation,
        events: EventSink,
    ) -> Self {
        let id = SubmissionId::new();

        info!(
            submission_id = %id,
            environment = ?environment.as_ref().map(|e| &e.marker),
            ?confirmation,
            "Creating new session"
        );

        Self {
            id,
            environment,
            confirmation,
            events,
            invocations: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn environment(&self) -> Option<&EnvironmentSnapshot> {
        self.environment.as_ref()
    }

    pub fn confirmation(&self) -> Confirmation {
        self.confirmation
    }

    pub fn emit(&self, event: EngineEvent) {
        self.events.emit(event);
    }

    /// Count a worker invocation
    pub fn record_invocation(&self) -> usize {
        self.invocations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Worker invocations made so far, escalations included
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Handle to a session for sharing across branches
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Session>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(session),
        }
    }

    pub fn id(&self) -> SubmissionId {
        self.inner.id
    }
}

impl std::ops::Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Admits at most one mutating submission at a time
#[derive(Debug, Default)]
pub struct MutationSlot {
    in_flight: Arc<Mutex<Option<TaskId>>>,
}

impl MutationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot; fails with `ConcurrentMutation` if it is taken
    pub fn acquire(&self, task_id: TaskId) -> Result<MutationGuard> {
        let mut guard = self.in_flight.lock();
        if let Some(in_flight) = *guard {
            warn!(%task_id, %in_flight, "Rejecting concurrent mutating task");
            return Err(CadreError::ConcurrentMutation { in_flight });
        }
        *guard = Some(task_id);
        debug!(%task_id, "Mutation slot acquired");

        Ok(MutationGuard {
            slot: Arc::clone(&self.in_flight),
            task_id,
        })
    }

    pub fn in_flight(&self) -> Option<TaskId> {
        *self.in_flight.lock()
    }
}

/// Releases the mutation slot on drop
#[derive(Debug)]
pub struct MutationGuard {
    slot: Arc<Mutex<Option<TaskId>>>,
    task_id: TaskId,
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if *slot == Some(self.task_id) {
            *slot = None;
        }
    }
}
