//! Main orchestrator - accepts submissions and drives them to a result

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::channel::{EventSink, EventStream};
use crate::config::EngineConfig;
use crate::envelope::{ContextEnvelope, TraceEntry};
use crate::error::CadreError;
use crate::events::EngineEvent;
use crate::executor::{BranchOutcome, GraphOutcome, Routes, TopologyExecutor};
use crate::invoker::WorkerInvoker;
use crate::registry::WorkerRegistry;
use crate::retry::{AttemptRecord, EscalationRecord, EscalationResolution, RetryManager};
use crate::router::Router;
use crate::safety::{Confirmation, EnvironmentQuery, SafetyDecision, SafetyGate};
use crate::session::{MutationSlot, Session, SessionHandle};
use crate::task::{Intent, SubmissionId, Task, TaskGraph, TopologyHint};

/// A request to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub intent: Intent,
    pub mutates_state: bool,
    #[serde(default)]
    pub topology_hint: TopologyHint,
    #[serde(default)]
    pub confirmation: Confirmation,
    /// Per-invocation deadline override
    #[serde(default)]
    pub deadline: Option<Duration>,
}

impl Submission {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            mutates_state: false,
            topology_hint: TopologyHint::Auto,
            confirmation: Confirmation::None,
            deadline: None,
        }
    }

    pub fn mutating(mut self) -> Self {
        self.mutates_state = true;
        self
    }

    pub fn with_topology(mut self, hint: TopologyHint) -> Self {
        self.topology_hint = hint;
        self
    }

    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Final result of a submission
#[derive(Debug)]
pub enum TaskResult {
    Success {
        output: String,
        trace: Vec<TraceEntry>,
    },
    /// Some fan-out branches failed; every branch is reported
    PartialFailure {
        branches: Vec<BranchOutcome>,
        synthesis: Option<String>,
        trace: Vec<TraceEntry>,
    },
    Escalated {
        record: EscalationRecord,
        resolution: EscalationResolution,
        trace: Vec<TraceEntry>,
    },
    /// The safety gate stopped the submission before any invocation
    Blocked(SafetyDecision),
    Failed {
        error: CadreError,
        history: Vec<AttemptRecord>,
        trace: Vec<TraceEntry>,
    },
}

impl TaskResult {
    fn failed(error: CadreError) -> Self {
        Self::Failed {
            error,
            history: Vec::new(),
            trace: Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Escalated { .. } => "escalated",
            Self::Blocked(_) => "blocked",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Trace accumulated before the submission ended
    pub fn trace(&self) -> &[TraceEntry] {
        match self {
            Self::Success { trace, .. }
            | Self::PartialFailure { trace, .. }
            | Self::Escalated { trace, .. }
            | Self::Failed { trace, .. } => trace,
            Self::Blocked(_) => &[],
        }
    }
}

impl From<GraphOutcome> for TaskResult {
    fn from(outcome: GraphOutcome) -> Self {
        match outcome {
            GraphOutcome::Succeeded { output, envelope } => Self::Success {
                output,
                trace: envelope.trace().to_vec(),
            },
            GraphOutcome::Partial {
                branches,
                synthesis,
                envelope,
            } => Self::PartialFailure {
                branches,
                synthesis,
                trace: envelope.trace().to_vec(),
            },
            GraphOutcome::Escalated {
                record,
                resolution,
                envelope,
            } => Self::Escalated {
                record,
                resolution,
                trace: envelope.trace().to_vec(),
            },
            GraphOutcome::Failed {
                error,
                history,
                envelope,
            } => Self::Failed {
                error,
                history,
                trace: envelope.trace().to_vec(),
            },
        }
    }
}

/// Turns a root task into a task graph
pub trait Planner: Send + Sync {
    fn plan(&self, task: Task, hint: TopologyHint) -> TaskGraph;
}

/// Plans from the intent's declared steps.
///
/// No steps gives a single task. Steps become a fan-out, a pipeline, or
/// the spokes of a hub whose synthesis is the parent intent. `Auto` picks
/// a pipeline when any step mutates state and a fan-out otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPlanner;

impl Planner for DefaultPlanner {
    fn plan(&self, mut task: Task, hint: TopologyHint) -> TaskGraph {
        let steps = std::mem::take(&mut task.intent.steps);
        if steps.is_empty() {
            return TaskGraph::Single(task);
        }

        let children: Vec<TaskGraph> = steps
            .into_iter()
            .map(|step| self.plan(task.child(step), TopologyHint::Auto))
            .collect();

        match hint {
            TopologyHint::Parallel => TaskGraph::Parallel(children),
            TopologyHint::Serial => TaskGraph::Serial(children),
            TopologyHint::Hub => TaskGraph::Hub {
                spokes: children,
                synthesis: task,
            },
            TopologyHint::Auto if children.iter().any(TaskGraph::mutates_state) => {
                TaskGraph::Serial(children)
            }
            TopologyHint::Auto => TaskGraph::Parallel(children),
        }
    }
}

/// The engine façade
///
/// Routes every task up front, then runs the graph through the topology
/// executor. Holds no per-submission state beyond the active-session map.
pub struct Orchestrator {
    config: EngineConfig,
    router: Router,
    gate: SafetyGate,
    executor: TopologyExecutor,
    environment: Arc<dyn EnvironmentQuery>,
    planner: Arc<dyn Planner>,
    mutation_slot: MutationSlot,
    /// Submissions currently running
    sessions: RwLock<HashMap<SubmissionId, SessionHandle>>,
    events: EventSink,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        invoker: Arc<dyn WorkerInvoker>,
        environment: Arc<dyn EnvironmentQuery>,
        config: EngineConfig,
    ) -> Self {
        let manager = RetryManager::new(
            Arc::clone(&registry),
            invoker,
            config.max_attempts,
            config.max_escalation_depth,
            config.default_deadline(),
        );

        info!(
            workers = registry.len(),
            max_attempts = config.max_attempts,
            max_parallel = config.max_parallel,
            "Creating orchestrator"
        );

        Self {
            router: Router::new(registry),
            gate: SafetyGate::new(),
            executor: TopologyExecutor::new(manager, config.max_parallel),
            environment,
            planner: Arc::new(DefaultPlanner),
            mutation_slot: MutationSlot::new(),
            sessions: RwLock::new(HashMap::new()),
            events: EventSink::disabled(),
            config,
        }
    }

    /// Attach an event stream
    pub fn with_events(mut self) -> (Self, EventStream) {
        let (stream, sink) = EventStream::new();
        self.events = sink;
        (self, stream)
    }

    pub fn with_planner(mut self, planner: impl Planner + 'static) -> Self {
        self.planner = Arc::new(planner);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        self.router.registry()
    }

    /// IDs of submissions currently running
    pub fn session_ids(&self) -> Vec<SubmissionId> {
        self.sessions.read().keys().copied().collect()
    }

    /// Plan and run a submission
    #[instrument(skip_all, fields(summary = %submission.intent.summary))]
    pub async fn submit(&self, submission: Submission) -> TaskResult {
        let mut task = Task::new(submission.intent, submission.mutates_state);
        if let Some(deadline) = submission.deadline {
            task = task.with_deadline(deadline);
        }

        let graph = self.planner.plan(task, submission.topology_hint);
        self.run(graph, submission.topology_hint, submission.confirmation)
            .await
    }

    /// Run an explicit task graph
    #[instrument(skip_all)]
    pub async fn submit_graph(&self, graph: TaskGraph, confirmation: Confirmation) -> TaskResult {
        let hint = match &graph {
            TaskGraph::Single(_) => TopologyHint::Auto,
            TaskGraph::Parallel(_) => TopologyHint::Parallel,
            TaskGraph::Serial(_) => TopologyHint::Serial,
            TaskGraph::Hub { .. } => TopologyHint::Hub,
        };
        self.run(graph, hint, confirmation).await
    }

    async fn run(
        &self,
        graph: TaskGraph,
        topology: TopologyHint,
        confirmation: Confirmation,
    ) -> TaskResult {
        let Some(root_id) = graph.root_task_id() else {
            return TaskResult::failed(CadreError::EmptyGraph);
        };
        let mutates_state = graph.mutates_state();

        let _slot = if mutates_state {
            match self.mutation_slot.acquire(root_id) {
                Ok(guard) => Some(guard),
                Err(e) => return TaskResult::failed(e),
            }
        } else {
            None
        };

        let environment = if mutates_state {
            match self.environment.current_branch_classification() {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(error = %e, "Environment query failed");
                    None
                }
            }
        } else {
            None
        };

        let session = SessionHandle::new(Session::new(
            environment,
            confirmation,
            self.events.clone(),
        ));
        self.sessions.write().insert(session.id(), session.clone());

        session.emit(EngineEvent::TaskSubmitted {
            submission_id: session.id(),
            task_id: root_id,
            topology,
            mutates_state,
        });

        let result: TaskResult = match self.preflight(&session, &graph) {
            Ok(routes) => {
                let envelope = ContextEnvelope::new(root_id);
                self.executor
                    .execute(&session, &routes, &graph, envelope)
                    .await
                    .into()
            }
            Err(result) => result,
        };

        self.sessions.write().remove(&session.id());
        session.emit(EngineEvent::TaskFinished {
            submission_id: session.id(),
            outcome: result.kind().to_string(),
        });

        match &result {
            TaskResult::Failed { error, .. } => {
                error!(error = %error, "Submission failed");
            }
            other => info!(
                outcome = other.kind(),
                invocations = session.invocations(),
                elapsed_ms = session.elapsed().as_millis() as u64,
                "Submission finished"
            ),
        }

        result
    }

    /// Gate and route every task before anything runs, so no worker is
    /// invoked unless every gate decision proceeds
    fn preflight(&self, session: &Session, graph: &TaskGraph) -> Result<Routes, TaskResult> {
        let mut routes = Routes::new();

        for task in graph.tasks() {
            if task.mutates_state {
                let decision =
                    self.gate
                        .evaluate(task, session.environment(), session.confirmation());
                session.emit(EngineEvent::SafetyEvaluated {
                    submission_id: session.id,
                    task_id: task.id,
                    decision: decision.clone(),
                });
                if !decision.proceeds() {
                    warn!(
                        task_id = %task.id,
                        resolution = %decision.resolution,
                        "Submission blocked by safety gate"
                    );
                    return Err(TaskResult::Blocked(decision));
                }
            }

            match self
                .router
                .route(task, session.environment(), session.confirmation())
            {
                Ok(worker) => {
                    session.emit(EngineEvent::WorkerRouted {
                        submission_id: session.id,
                        task_id: task.id,
                        worker: worker.name.clone(),
                    });
                    routes.insert(task.id, worker);
                }
                Err(CadreError::RoutingBlocked { worker, decision }) => {
                    warn!(
                        task_id = %task.id,
                        worker = %worker,
                        resolution = %decision.resolution,
                        "Routing blocked by safety gate"
                    );
                    return Err(TaskResult::Blocked(decision));
                }
                Err(e) => return Err(TaskResult::failed(e)),
            }
        }

        debug!(routed = routes.len(), "Pre-flight routing complete");
        Ok(routes)
    }
}
