//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use cadre::{
    ContextEnvelope, EngineConfig, EnvironmentQuery, EnvironmentSnapshot, EscalationSettings,
    Intent, Orchestrator, RetryState, StaticEnvironment, Task, WorkerDefinition, WorkerDescriptor,
    WorkerInvoker, WorkerOutcome, WorkerRegistry,
};

pub const CODE_REVIEWER: &str = r#"---
name: code-reviewer
description: Reviews changes for `quality` issues. Use PROACTIVELY after edits.
model_tier: sonnet
proactive_triggers:
  - keyword:review
mutates_state: false
category: quality
---
You review code.
"#;

pub const TEST_RUNNER: &str = r#"---
name: test-runner
description: Runs and fixes the test suite
model_tier: haiku
proactive_triggers:
  - keyword:test
  - "**/*_test.rs"
category: quality
---
You run tests.
"#;

pub const BACKEND_DEV: &str = r#"---
name: backend-dev
description: Implements server-side changes
proactive_triggers:
  - keyword:api
  - file:src/**/*.rs
category: engineering
---
You write backend code.
"#;

pub const TECH_LEAD: &str = r#"---
name: tech-lead
description: Unblocks engineers
proactive_triggers:
  - keyword:lead
mutates_state: false
category: leadership
escalates_to: architect
---
"#;

pub const ARCHITECT: &str = r#"---
name: architect
description: Owns system design
model_tier: opus
proactive_triggers:
  - keyword:design
mutates_state: false
category: leadership
---
"#;

pub const DEFINITIONS: [&str; 5] = [CODE_REVIEWER, TEST_RUNNER, BACKEND_DEV, TECH_LEAD, ARCHITECT];

pub fn escalation() -> EscalationSettings {
    EscalationSettings::default()
        .with_target("quality", "tech-lead")
        .with_target("engineering", "tech-lead")
}

pub fn registry() -> Arc<WorkerRegistry> {
    let definitions: Vec<_> = DEFINITIONS
        .iter()
        .map(|md| WorkerDefinition::from_markdown(md).unwrap())
        .collect();
    Arc::new(WorkerRegistry::from_definitions(&definitions, &escalation()).unwrap())
}

pub fn config() -> EngineConfig {
    EngineConfig::default().with_default_deadline(Duration::from_secs(5))
}

pub fn orchestrator(invoker: Arc<ScriptedInvoker>, environment: EnvironmentSnapshot) -> Orchestrator {
    Orchestrator::new(
        registry(),
        invoker,
        Arc::new(StaticEnvironment::new(environment)),
        config(),
    )
}

pub fn feature_branch() -> EnvironmentSnapshot {
    EnvironmentSnapshot::unprotected("feature/login")
}

pub fn intent(summary: &str, keyword: &str) -> Intent {
    Intent::new(summary).with_keyword(keyword)
}

/// Environment whose query always fails
pub struct BrokenEnvironment;

impl EnvironmentQuery for BrokenEnvironment {
    fn current_branch_classification(&self) -> anyhow::Result<EnvironmentSnapshot> {
        anyhow::bail!("not a git repository")
    }
}

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub worker: String,
    pub task: String,
    pub attempt: u32,
    pub trace_len: usize,
    pub notes: Vec<String>,
}

struct Step {
    outcome: WorkerOutcome,
    delay: Option<Duration>,
}

/// Invoker that replays scripted outcomes per worker.
///
/// Unscripted calls succeed with "<worker>: <summary>".
#[derive(Default)]
pub struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<Call>>,
    active_mutations: AtomicUsize,
    peak_mutations: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, worker: &str, outcome: WorkerOutcome) -> &Self {
        self.push(worker, outcome, None)
    }

    pub fn script_delayed(&self, worker: &str, outcome: WorkerOutcome, delay: Duration) -> &Self {
        self.push(worker, outcome, Some(delay))
    }

    fn push(&self, worker: &str, outcome: WorkerOutcome, delay: Option<Duration>) -> &Self {
        self.scripts
            .lock()
            .entry(worker.to_string())
            .or_default()
            .push_back(Step { outcome, delay });
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, worker: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.worker == worker).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Most mutating invocations ever observed running at once
    pub fn peak_mutations(&self) -> usize {
        self.peak_mutations.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        worker: &WorkerDescriptor,
        envelope: &ContextEnvelope,
        task: &Task,
        retry: &RetryState,
    ) -> anyhow::Result<WorkerOutcome> {
        self.calls.lock().push(Call {
            worker: worker.name.clone(),
            task: task.summary().to_string(),
            attempt: retry.attempts(),
            trace_len: envelope.len(),
            notes: envelope.notes().to_vec(),
        });

        let step = self
            .scripts
            .lock()
            .get_mut(&worker.name)
            .and_then(|queue| queue.pop_front());

        let _active = if task.mutates_state && worker.mutates_state {
            let now = self.active_mutations.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_mutations.fetch_max(now, Ordering::SeqCst);
            Some(ActiveGuard(&self.active_mutations))
        } else {
            None
        };

        match step {
            Some(Step { outcome, delay }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(outcome)
            }
            None => Ok(WorkerOutcome::success(format!(
                "{}: {}",
                worker.name,
                task.summary()
            ))),
        }
    }
}
