//! Worker registry - static catalog of available workers

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::EscalationSettings;
use crate::definition::{self, WorkerDefinition};
use crate::error::{CadreError, Result};
use crate::hierarchy::EscalationHierarchy;
use crate::task::Task;
use crate::worker::{WorkerDescriptor, WorkerHandle};

/// Category assigned to workers that declare none
pub const DEFAULT_CATEGORY: &str = "general";

/// Catalog of workers in declaration order.
///
/// Read-only once shared with the engine, so concurrent reads need no
/// synchronization.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Vec<WorkerHandle>,
    by_name: HashMap<String, usize>,
    escalation: EscalationHierarchy,
}

impl WorkerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from definitions and resolve escalation targets
    pub fn from_definitions(
        definitions: &[WorkerDefinition],
        escalation: &EscalationSettings,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for def in definitions {
            registry.register(def.compile()?)?;
        }
        registry.resolve_escalation(escalation)?;
        Ok(registry)
    }

    /// Load all definitions in a directory
    pub fn load_dir(dir: impl AsRef<Path>, escalation: &EscalationSettings) -> Result<Self> {
        let definitions = definition::load_dir(dir)?;
        Self::from_definitions(&definitions, escalation)
    }

    /// Register a worker; names must be unique
    pub fn register(&mut self, descriptor: WorkerDescriptor) -> Result<WorkerHandle> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(CadreError::DuplicateWorker(descriptor.name));
        }

        let handle = WorkerHandle::new(descriptor);
        self.by_name.insert(handle.name.clone(), self.workers.len());
        self.workers.push(handle.clone());

        info!(
            worker = %handle.name,
            tier = ?handle.tier,
            mutates_state = handle.mutates_state,
            "Registered worker"
        );
        Ok(handle)
    }

    /// Resolve every worker's escalation target.
    ///
    /// An explicit `escalates_to` wins over the category mapping. Every
    /// target must be a registered worker.
    pub fn resolve_escalation(&mut self, settings: &EscalationSettings) -> Result<()> {
        let mut hierarchy = EscalationHierarchy::new();

        for worker in &self.workers {
            let target = worker
                .escalates_to
                .as_deref()
                .or_else(|| settings.target_for(&worker.category));

            if let Some(t) = target {
                if !self.by_name.contains_key(t) {
                    return Err(CadreError::UnknownEscalationTarget {
                        source_name: worker.name.clone(),
                        target: t.to_string(),
                    });
                }
            }

            hierarchy.add_worker(&worker.name, target);
        }

        for worker in &self.workers {
            if hierarchy.has_loop(&worker.name) {
                warn!(worker = %worker.name, "Escalation map loops; chain will stop before revisiting");
            }
        }

        debug!(roots = ?hierarchy.roots(), "Resolved escalation hierarchy");
        self.escalation = hierarchy;
        Ok(())
    }

    /// Candidates for a task, most specific first, ties in declaration order
    pub fn match_task(&self, task: &Task) -> Vec<WorkerHandle> {
        let mut scored: Vec<_> = self
            .workers
            .iter()
            .enumerate()
            .filter_map(|(idx, w)| w.score(task).map(|score| (score, idx, w)))
            .collect();

        // Stable sort keeps declaration order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored.into_iter().map(|(_, _, w)| w.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<WorkerHandle> {
        self.by_name.get(name).map(|&idx| self.workers[idx].clone())
    }

    /// Direct escalation target of a worker
    pub fn escalation_target(&self, name: &str) -> Option<WorkerHandle> {
        self.escalation.target(name).and_then(|t| self.get(t))
    }

    /// Escalation chain above a worker, bounded by `max_depth`
    pub fn escalation_chain(&self, name: &str, max_depth: usize) -> Vec<WorkerHandle> {
        self.escalation
            .path(name, max_depth)
            .iter()
            .filter_map(|t| self.get(t))
            .collect()
    }

    pub fn hierarchy(&self) -> &EscalationHierarchy {
        &self.escalation
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
