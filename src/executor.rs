//! Topology executor - runs routed task graphs
//!
//! ```text
//!  Parallel            Serial               Hub
//!  ┌──┬──┬──┐          ┌──┐   ┌──┐          ┌──┬──┬──┐
//!  │A │B │C │          │A │──▶│B │──▶ ...   │A │B │C │  spokes
//!  └┬─┴┬─┴┬─┘          └──┘   └──┘          └┬─┴┬─┴┬─┘
//!   └──┼──┘ join                              └──┼──┘
//!      ▼                                         ▼
//!   merged                                   synthesis
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::envelope::{ContextEnvelope, TraceEntry};
use crate::error::CadreError;
use crate::retry::{
    AttemptRecord, EscalationRecord, EscalationResolution, InvocationOutcome, RetryManager,
};
use crate::session::Session;
use crate::task::{Task, TaskGraph, TaskId};
use crate::worker::WorkerHandle;

/// Worker chosen for each task during pre-flight routing
pub type Routes = HashMap<TaskId, WorkerHandle>;

/// Terminal state of one branch of a fan-out
#[derive(Debug)]
pub enum BranchStatus {
    Succeeded {
        output: String,
    },
    /// A nested fan-out that partly failed
    Partial {
        branches: Vec<BranchOutcome>,
        synthesis: Option<String>,
    },
    Escalated {
        record: EscalationRecord,
        resolution: EscalationResolution,
    },
    Failed {
        error: CadreError,
        history: Vec<AttemptRecord>,
    },
}

impl BranchStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Whether an escalation target failed here or in any nested branch
    pub fn is_escalation_failure(&self) -> bool {
        match self {
            Self::Failed { error, .. } => error.is_escalation_failure(),
            Self::Partial { branches, .. } => {
                branches.iter().any(|b| b.status.is_escalation_failure())
            }
            _ => false,
        }
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { .. } => write!(f, "succeeded"),
            Self::Partial { branches, .. } => {
                let failed = branches.iter().filter(|b| !b.status.is_success()).count();
                write!(f, "partially failed ({failed}/{} branches)", branches.len())
            }
            Self::Escalated { record, .. } => {
                write!(f, "escalated from {}", record.originating_worker)
            }
            Self::Failed { error, .. } => write!(f, "failed: {error}"),
        }
    }
}

/// Outcome of one branch, reported in order of declaration
#[derive(Debug)]
pub struct BranchOutcome {
    pub index: usize,
    /// Routed worker, for single-task branches
    pub worker: Option<String>,
    pub status: BranchStatus,
    /// Entries this branch added to the trace
    pub trace: Vec<TraceEntry>,
    /// Set when a sibling's escalation target failed; the output should be
    /// treated as advice rather than a committed result
    pub advisory: bool,
}

/// Result of running a (sub)graph
#[derive(Debug)]
pub enum GraphOutcome {
    Succeeded {
        output: String,
        envelope: ContextEnvelope,
    },
    Partial {
        branches: Vec<BranchOutcome>,
        synthesis: Option<String>,
        envelope: ContextEnvelope,
    },
    Escalated {
        record: EscalationRecord,
        resolution: EscalationResolution,
        envelope: ContextEnvelope,
    },
    Failed {
        error: CadreError,
        history: Vec<AttemptRecord>,
        envelope: ContextEnvelope,
    },
}

impl GraphOutcome {
    pub fn envelope(&self) -> &ContextEnvelope {
        match self {
            Self::Succeeded { envelope, .. }
            | Self::Partial { envelope, .. }
            | Self::Escalated { envelope, .. }
            | Self::Failed { envelope, .. } => envelope,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    fn is_escalation_failure(&self) -> bool {
        match self {
            Self::Failed { error, .. } => error.is_escalation_failure(),
            Self::Partial { branches, .. } => {
                branches.iter().any(|b| b.status.is_escalation_failure())
            }
            _ => false,
        }
    }

    fn into_branch(self, index: usize, worker: Option<String>, base: usize) -> BranchOutcome {
        let trace = self.envelope().trace().iter().skip(base).cloned().collect();
        let status = match self {
            Self::Succeeded { output, .. } => BranchStatus::Succeeded { output },
            Self::Partial {
                branches,
                synthesis,
                ..
            } => BranchStatus::Partial {
                branches,
                synthesis,
            },
            Self::Escalated {
                record, resolution, ..
            } => BranchStatus::Escalated { record, resolution },
            Self::Failed { error, history, .. } => BranchStatus::Failed { error, history },
        };

        BranchOutcome {
            index,
            worker,
            status,
            trace,
            advisory: false,
        }
    }
}

/// Runs task graphs under the parallel, serial and hub topologies
#[derive(Clone)]
pub struct TopologyExecutor {
    manager: RetryManager,
    limiter: Arc<Semaphore>,
}

impl TopologyExecutor {
    /// `max_parallel` bounds concurrent worker invocations
    pub fn new(manager: RetryManager, max_parallel: usize) -> Self {
        Self {
            manager,
            limiter: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    pub fn manager(&self) -> &RetryManager {
        &self.manager
    }

    /// Run a graph. Every task must already have a route.
    pub async fn execute(
        &self,
        session: &Session,
        routes: &Routes,
        graph: &TaskGraph,
        envelope: ContextEnvelope,
    ) -> GraphOutcome {
        self.run_node(session, routes, graph, envelope).await
    }

    fn run_node<'a>(
        &'a self,
        session: &'a Session,
        routes: &'a Routes,
        node: &'a TaskGraph,
        envelope: ContextEnvelope,
    ) -> BoxFuture<'a, GraphOutcome> {
        async move {
            match node {
                TaskGraph::Single(task) => self.run_single(session, routes, task, envelope).await,
                TaskGraph::Parallel(nodes) => {
                    self.run_parallel(session, routes, nodes, envelope).await
                }
                TaskGraph::Serial(nodes) => self.run_serial(session, routes, nodes, envelope).await,
                TaskGraph::Hub { spokes, synthesis } => {
                    self.run_hub(session, routes, spokes, synthesis, envelope)
                        .await
                }
            }
        }
        .boxed()
    }

    async fn run_single(
        &self,
        session: &Session,
        routes: &Routes,
        task: &Task,
        mut envelope: ContextEnvelope,
    ) -> GraphOutcome {
        let Some(worker) = routes.get(&task.id) else {
            return GraphOutcome::Failed {
                error: CadreError::NoMatch {
                    task_id: task.id,
                    summary: task.summary().to_string(),
                },
                history: Vec::new(),
                envelope,
            };
        };

        let _permit = self.limiter.acquire().await.ok();

        match self.manager.run(session, worker, task, &envelope).await {
            InvocationOutcome::Succeeded(entry) => {
                let output = entry.output.clone();
                GraphOutcome::Succeeded {
                    output,
                    envelope: envelope.extended(entry),
                }
            }
            InvocationOutcome::Escalated {
                record,
                resolution,
                entry,
            } => {
                if let Some(entry) = entry {
                    envelope.push(entry);
                }
                envelope.note(record.summary());
                GraphOutcome::Escalated {
                    record,
                    resolution,
                    envelope,
                }
            }
            InvocationOutcome::Failed { error, history } => GraphOutcome::Failed {
                error,
                history,
                envelope,
            },
        }
    }

    /// Run branches concurrently on forked envelopes and collect them in order
    async fn fan_out(
        &self,
        session: &Session,
        routes: &Routes,
        nodes: &[TaskGraph],
        envelope: &ContextEnvelope,
    ) -> (Vec<BranchOutcome>, ContextEnvelope) {
        let base = envelope.len();
        let branches = nodes.iter().map(|node| {
            let fork = envelope.fork(node.root_task_id().unwrap_or(envelope.task_id()));
            self.run_node(session, routes, node, fork)
        });
        let results = join_all(branches).await;

        let merged = ContextEnvelope::merge(envelope, results.iter().map(|r| r.envelope()));
        let poisoned = results.iter().any(GraphOutcome::is_escalation_failure);

        let mut outcomes: Vec<BranchOutcome> = results
            .into_iter()
            .zip(nodes)
            .enumerate()
            .map(|(index, (result, node))| {
                let worker = match node {
                    TaskGraph::Single(task) => routes.get(&task.id).map(|w| w.name.clone()),
                    _ => None,
                };
                result.into_branch(index, worker, base)
            })
            .collect();

        if poisoned {
            for branch in outcomes
                .iter_mut()
                .filter(|b| !b.status.is_escalation_failure())
            {
                branch.advisory = true;
            }
            warn!("Escalation target failed, sibling branches marked advisory");
        }

        (outcomes, merged)
    }

    async fn run_parallel(
        &self,
        session: &Session,
        routes: &Routes,
        nodes: &[TaskGraph],
        envelope: ContextEnvelope,
    ) -> GraphOutcome {
        debug!(branches = nodes.len(), "Fanning out");
        let (branches, merged) = self.fan_out(session, routes, nodes, &envelope).await;

        if branches.iter().all(|b| b.status.is_success()) {
            let output = branches
                .iter()
                .filter_map(|b| match &b.status {
                    BranchStatus::Succeeded { output } => Some(output.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            return GraphOutcome::Succeeded {
                output,
                envelope: merged,
            };
        }

        info!(
            failed = branches.iter().filter(|b| !b.status.is_success()).count(),
            total = branches.len(),
            "Fan-out partially failed"
        );
        GraphOutcome::Partial {
            branches,
            synthesis: None,
            envelope: merged,
        }
    }

    async fn run_serial(
        &self,
        session: &Session,
        routes: &Routes,
        nodes: &[TaskGraph],
        envelope: ContextEnvelope,
    ) -> GraphOutcome {
        let mut current = envelope;
        let mut output = String::new();

        for (stage, node) in nodes.iter().enumerate() {
            let stage_envelope = current.fork(node.root_task_id().unwrap_or(current.task_id()));
            match self.run_node(session, routes, node, stage_envelope).await {
                GraphOutcome::Succeeded {
                    output: stage_output,
                    envelope,
                } => {
                    debug!(stage, "Pipeline stage succeeded");
                    output = stage_output;
                    current = envelope;
                }
                halted => {
                    info!(
                        stage,
                        skipped = nodes.len() - stage - 1,
                        "Pipeline halted"
                    );
                    return halted;
                }
            }
        }

        GraphOutcome::Succeeded {
            output,
            envelope: current,
        }
    }

    async fn run_hub(
        &self,
        session: &Session,
        routes: &Routes,
        spokes: &[TaskGraph],
        synthesis: &Task,
        envelope: ContextEnvelope,
    ) -> GraphOutcome {
        debug!(spokes = spokes.len(), "Running hub spokes");
        let (mut branches, mut merged) = self.fan_out(session, routes, spokes, &envelope).await;

        for branch in branches.iter().filter(|b| !b.status.is_success()) {
            merged.note(format!("spoke {} {}", branch.index, branch.status));
        }
        let all_spokes_ok = branches.iter().all(|b| b.status.is_success());

        let synthesis_envelope = merged.fork(synthesis.id);
        let base = synthesis_envelope.len();
        let outcome = self
            .run_single(session, routes, synthesis, synthesis_envelope)
            .await;

        match outcome {
            GraphOutcome::Succeeded { output, envelope } if !all_spokes_ok => {
                GraphOutcome::Partial {
                    branches,
                    synthesis: Some(output),
                    envelope,
                }
            }
            outcome if all_spokes_ok => outcome,
            outcome => {
                let index = branches.len();
                let worker = routes.get(&synthesis.id).map(|w| w.name.clone());
                let envelope = outcome.envelope().clone();
                branches.push(outcome.into_branch(index, worker, base));
                GraphOutcome::Partial {
                    branches,
                    synthesis: None,
                    envelope,
                }
            }
        }
    }
}
