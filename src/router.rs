//! Router - picks the worker for a task

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::{CadreError, Result};
use crate::registry::WorkerRegistry;
use crate::safety::{Confirmation, EnvironmentSnapshot, SafetyGate};
use crate::task::Task;
use crate::worker::WorkerHandle;

/// Routes tasks to the most specific capable worker
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<WorkerRegistry>,
    gate: SafetyGate,
}

impl Router {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            gate: SafetyGate::new(),
        }
    }

    /// Route a task.
    ///
    /// Deterministic for a fixed registry and snapshot. A worker is only
    /// returned for a mutating task, or as a mutating worker, with a
    /// `proceed` gate decision.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn route(
        &self,
        task: &Task,
        environment: Option<&EnvironmentSnapshot>,
        confirmation: Confirmation,
    ) -> Result<WorkerHandle> {
        let worker = self
            .registry
            .match_task(task)
            .into_iter()
            .next()
            .ok_or_else(|| CadreError::NoMatch {
                task_id: task.id,
                summary: task.summary().to_string(),
            })?;

        if task.mutates_state || worker.mutates_state {
            let decision = self.gate.evaluate(task, environment, confirmation);
            if !decision.proceeds() {
                return Err(CadreError::RoutingBlocked {
                    worker: worker.name.clone(),
                    decision,
                });
            }
        }

        debug!(worker = %worker.name, "Routed task");
        Ok(worker)
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }
}
