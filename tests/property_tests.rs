mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;

use cadre::{
    Confirmation, ContextEnvelope, EnvironmentSnapshot, FailureCategory, Intent, Orchestrator,
    RetryState, Router, StaticEnvironment, Submission, Task, TaskGraph, TaskId, TaskResult,
    TraceEntry, Trigger, WorkerDescriptor, WorkerInvoker, WorkerOutcome, WorkerRegistry,
};

use common::*;

const KEYWORDS: [&str; 6] = ["review", "test", "api", "lead", "design", "unknown"];
const FILES: [&str; 4] = [
    "src/lib.rs",
    "src/net/conn_test.rs",
    "docs/guide.md",
    "conn_test.rs",
];

fn task_strategy() -> impl Strategy<Value = Task> {
    (
        proptest::sample::subsequence(KEYWORDS.to_vec(), 0..=3),
        proptest::sample::subsequence(FILES.to_vec(), 0..=2),
    )
        .prop_map(|(keywords, files)| {
            let mut intent = Intent::new("generated");
            for k in keywords {
                intent = intent.with_keyword(k);
            }
            for f in files {
                intent = intent.with_file(f);
            }
            Task::new(intent, false)
        })
}

fn entry(task_id: TaskId, worker: &str) -> TraceEntry {
    TraceEntry {
        task_id,
        worker: worker.to_string(),
        output: format!("{worker} output"),
        attempts: 1,
        failures: Vec::new(),
        escalated_from: None,
    }
}

/// Sleeps per task and records which trace entries each invocation saw
#[derive(Default)]
struct Recorder {
    delays: HashMap<String, u64>,
    seen: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl WorkerInvoker for Recorder {
    async fn invoke(
        &self,
        _worker: &WorkerDescriptor,
        envelope: &ContextEnvelope,
        task: &Task,
        _retry: &RetryState,
    ) -> anyhow::Result<WorkerOutcome> {
        let summary = task.summary().to_string();
        let trace: Vec<String> = envelope.trace().iter().map(|e| e.output.clone()).collect();
        self.seen.lock().push((summary.clone(), trace));
        if let Some(ms) = self.delays.get(&summary) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        Ok(WorkerOutcome::success(summary))
    }
}

fn single_worker_engine(
    invoker: Arc<dyn WorkerInvoker>,
    mutates: bool,
    env: EnvironmentSnapshot,
) -> Orchestrator {
    let worker = WorkerDescriptor::new("generalist", vec![Trigger::keyword("go")]);
    let worker = if mutates { worker } else { worker.read_only() };
    let mut registry = WorkerRegistry::new();
    registry.register(worker).unwrap();
    Orchestrator::new(
        Arc::new(registry),
        invoker,
        Arc::new(StaticEnvironment::new(env)),
        config(),
    )
}

fn confirmation_strategy() -> impl Strategy<Value = Confirmation> {
    prop_oneof![
        Just(Confirmation::None),
        Just(Confirmation::Granted),
        Just(Confirmation::Declined),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn concurrent_branches_never_see_siblings(
        delays in proptest::collection::vec(proptest::collection::vec(0u64..15, 1..4), 1..5),
    ) {
        let mut recorder = Recorder::default();
        let mut branches = Vec::new();
        for (i, stages) in delays.iter().enumerate() {
            let mut serial = Vec::new();
            for (j, ms) in stages.iter().enumerate() {
                let summary = format!("b{i}s{j}");
                recorder.delays.insert(summary.clone(), *ms);
                serial.push(TaskGraph::Single(Task::new(intent(&summary, "go"), false)));
            }
            branches.push(TaskGraph::Serial(serial));
        }
        let recorder = Arc::new(recorder);
        let engine = single_worker_engine(recorder.clone(), false, feature_branch());

        let result = tokio_test::block_on(
            engine.submit_graph(TaskGraph::Parallel(branches), Confirmation::None),
        );

        prop_assert!(result.is_success());
        let seen = recorder.seen.lock().clone();
        prop_assert_eq!(seen.len(), delays.iter().map(Vec::len).sum::<usize>());
        for (summary, trace) in &seen {
            // "b{i}s{j}" sees exactly stages 0..j of its own branch
            let (branch, stage) = summary[1..].split_once('s').unwrap();
            let stage: usize = stage.parse().unwrap();
            let expected: Vec<String> = (0..stage).map(|k| format!("b{branch}s{k}")).collect();
            prop_assert_eq!(trace, &expected);
        }

        // The join keeps declaration order regardless of completion order
        let merged: Vec<String> = result.trace().iter().map(|e| e.output.clone()).collect();
        let expected: Vec<String> = delays
            .iter()
            .enumerate()
            .flat_map(|(i, stages)| (0..stages.len()).map(move |j| format!("b{i}s{j}")))
            .collect();
        prop_assert_eq!(merged, expected);
    }

    #[test]
    fn gate_never_lets_unresolved_mutation_through(
        task_mutates in any::<bool>(),
        worker_mutates in any::<bool>(),
        protected in any::<bool>(),
        confirmation in confirmation_strategy(),
    ) {
        let invoker = ScriptedInvoker::new();
        let env = if protected {
            EnvironmentSnapshot::protected("main")
        } else {
            feature_branch()
        };
        let engine = single_worker_engine(invoker.clone(), worker_mutates, env);

        let mut submission =
            Submission::new(intent("change things", "go")).with_confirmation(confirmation);
        if task_mutates {
            submission = submission.mutating();
        }
        let result = tokio_test::block_on(engine.submit(submission));

        let proceeds = !task_mutates || !protected || confirmation == Confirmation::Granted;
        if proceeds {
            prop_assert!(result.is_success());
            prop_assert_eq!(invoker.total_calls(), 1);
        } else {
            let blocked = matches!(result, TaskResult::Blocked(_));
            prop_assert!(blocked);
            prop_assert_eq!(invoker.total_calls(), 0);
        }
    }
}

proptest! {
    #[test]
    fn routing_is_deterministic(task in task_strategy()) {
        let router = Router::new(registry());
        let first = router.route(&task, None, Default::default()).map(|w| w.name.clone());
        for _ in 0..3 {
            let again = router.route(&task, None, Default::default()).map(|w| w.name.clone());
            prop_assert_eq!(first.as_ref().ok(), again.as_ref().ok());
        }

        // Independent registries built from the same definitions agree too
        let other = Router::new(registry());
        let third = other.route(&task, None, Default::default()).map(|w| w.name.clone());
        prop_assert_eq!(first.ok(), third.ok());
    }

    #[test]
    fn retries_never_exceed_max_attempts(failures in 0usize..6) {
        let invoker = ScriptedInvoker::new();
        for i in 0..failures {
            invoker.script(
                "code-reviewer",
                WorkerOutcome::failure(FailureCategory::BuildFailure, format!("approach {i}"), "error"),
            );
        }
        let engine = orchestrator(invoker.clone(), feature_branch());

        let result = tokio_test::block_on(
            engine.submit(Submission::new(intent("review", "review"))),
        );

        let max = engine.config().max_attempts as usize;
        prop_assert!(invoker.calls_to("code-reviewer") <= max);
        if failures < max {
            prop_assert!(result.is_success());
            prop_assert_eq!(invoker.calls_to("code-reviewer"), failures + 1);
        } else {
            let escalated = matches!(result, TaskResult::Escalated { .. });
            prop_assert!(escalated);
            prop_assert_eq!(invoker.calls_to("code-reviewer"), max);
        }
    }

    #[test]
    fn forked_envelopes_are_isolated(
        base in 0usize..4,
        branch_sizes in proptest::collection::vec(0usize..4, 1..5),
    ) {
        let root = TaskId::new();
        let mut parent = ContextEnvelope::new(root);
        for _ in 0..base {
            parent.push(entry(root, "planner"));
        }

        let mut branches: Vec<_> = branch_sizes.iter().map(|_| parent.fork(TaskId::new())).collect();
        for (i, (branch, size)) in branches.iter_mut().zip(&branch_sizes).enumerate() {
            let id = branch.task_id();
            for _ in 0..*size {
                branch.push(entry(id, &format!("worker-{i}")));
            }
        }

        // Writing to one branch never shows up in the parent or a sibling
        prop_assert_eq!(parent.len(), base);
        for (branch, size) in branches.iter().zip(&branch_sizes) {
            prop_assert_eq!(branch.len(), base + size);
        }

        let merged = ContextEnvelope::merge(&parent, &branches);
        prop_assert_eq!(merged.len(), base + branch_sizes.iter().sum::<usize>());
        prop_assert_eq!(&merged.trace()[..base], parent.trace());

        let workers: Vec<_> = merged.trace()[base..].iter().map(|e| e.worker.clone()).collect();
        let mut expected = Vec::new();
        for (i, size) in branch_sizes.iter().enumerate() {
            expected.extend(std::iter::repeat(format!("worker-{i}")).take(*size));
        }
        prop_assert_eq!(workers, expected);
    }
}

#[test]
fn parallel_branches_see_only_the_parent_trace() {
    let invoker = ScriptedInvoker::new();
    let engine = orchestrator(Arc::clone(&invoker), feature_branch());

    let root = Intent::new("fan out")
        .with_step(intent("one", "review"))
        .with_step(intent("two", "design"))
        .with_step(intent("three", "lead"));
    let result = tokio_test::block_on(engine.submit(
        Submission::new(root).with_topology(cadre::TopologyHint::Parallel),
    ));

    assert!(result.is_success());
    assert!(invoker.calls().iter().all(|c| c.trace_len == 0));
    assert_eq!(result.trace().len(), 3);
}
