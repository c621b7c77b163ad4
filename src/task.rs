//! Tasks, intents and task graphs

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifies a single task
    TaskId
);
id_type!(
    /// Identifies the context a task originated from
    ContextId
);
id_type!(
    /// Identifies one submission to the engine
    SubmissionId
);

/// Task priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Pre-classified intent of a task.
///
/// The core never interprets `summary` or `payload`; routing only looks at
/// `keywords` and `files`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Pre-classified sub-steps, used by planners to build a graph
    #[serde(default)]
    pub steps: Vec<Intent>,
    /// Overrides the submission's mutation flag for this step
    #[serde(default)]
    pub mutates_state: Option<bool>,
}

impl Intent {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.files.push(path.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_step(mut self, step: Intent) -> Self {
        self.steps.push(step);
        self
    }

    pub fn mutating(mut self, mutates: bool) -> Self {
        self.mutates_state = Some(mutates);
        self
    }
}

/// A unit of work. Read-only once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub intent: Intent,
    pub context_id: ContextId,
    pub mutates_state: bool,
    pub priority: Priority,
    /// Per-invocation deadline; falls back to the engine default
    pub deadline: Option<Duration>,
}

impl Task {
    pub fn new(intent: Intent, mutates_state: bool) -> Self {
        Self {
            id: TaskId::new(),
            intent,
            context_id: ContextId::new(),
            mutates_state,
            priority: Priority::Normal,
            deadline: None,
        }
    }

    pub fn with_context(mut self, context_id: ContextId) -> Self {
        self.context_id = context_id;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Derive a child task from a sub-step, inheriting context and mutation
    pub fn child(&self, intent: Intent) -> Self {
        let mutates_state = intent.mutates_state.unwrap_or(self.mutates_state);
        Self {
            id: TaskId::new(),
            intent,
            context_id: self.context_id,
            mutates_state,
            priority: self.priority,
            deadline: self.deadline,
        }
    }

    pub fn summary(&self) -> &str {
        &self.intent.summary
    }
}

/// Requested execution topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyHint {
    #[default]
    Auto,
    Parallel,
    Serial,
    Hub,
}

/// An acyclic task graph. Trees only, so cycles cannot be expressed.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskGraph {
    Single(Task),
    /// Fork-join over independent branches
    Parallel(Vec<TaskGraph>),
    /// Ordered pipeline
    Serial(Vec<TaskGraph>),
    /// Spokes run concurrently, then `synthesis` merges their outcomes
    Hub {
        spokes: Vec<TaskGraph>,
        synthesis: Task,
    },
}

impl TaskGraph {
    /// All tasks in the graph, depth-first
    pub fn tasks(&self) -> Vec<&Task> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Task>) {
        match self {
            Self::Single(task) => out.push(task),
            Self::Parallel(nodes) | Self::Serial(nodes) => {
                for node in nodes {
                    node.collect(out);
                }
            }
            Self::Hub { spokes, synthesis } => {
                for node in spokes {
                    node.collect(out);
                }
                out.push(synthesis);
            }
        }
    }

    pub fn mutates_state(&self) -> bool {
        self.tasks().iter().any(|t| t.mutates_state)
    }

    /// Id of the task that anchors this graph's envelope: the first task
    /// in declaration order, skipping empty sub-graphs
    pub fn root_task_id(&self) -> Option<TaskId> {
        match self {
            Self::Single(task) => Some(task.id),
            Self::Hub { synthesis, .. } => Some(synthesis.id),
            Self::Parallel(nodes) | Self::Serial(nodes) => {
                nodes.iter().find_map(TaskGraph::root_task_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_inherits_mutation() {
        let parent = Task::new(Intent::new("parent"), true);
        let child = parent.child(Intent::new("child"));
        assert!(child.mutates_state);
        assert_eq!(child.context_id, parent.context_id);
        assert_ne!(child.id, parent.id);

        let read_only = parent.child(Intent::new("read").mutating(false));
        assert!(!read_only.mutates_state);
    }

    #[test]
    fn test_root_skips_empty_subgraphs() {
        let task = Task::new(Intent::new("a"), false);
        let id = task.id;
        let graph = TaskGraph::Serial(vec![
            TaskGraph::Parallel(vec![]),
            TaskGraph::Serial(vec![TaskGraph::Parallel(vec![])]),
            TaskGraph::Single(task),
        ]);
        assert_eq!(graph.root_task_id(), Some(id));
        assert_eq!(TaskGraph::Parallel(vec![TaskGraph::Serial(vec![])]).root_task_id(), None);
    }

    #[test]
    fn test_graph_tasks_order() {
        let a = Task::new(Intent::new("a"), false);
        let b = Task::new(Intent::new("b"), false);
        let s = Task::new(Intent::new("s"), false);
        let graph = TaskGraph::Hub {
            spokes: vec![
                TaskGraph::Single(a.clone()),
                TaskGraph::Serial(vec![TaskGraph::Single(b.clone())]),
            ],
            synthesis: s.clone(),
        };
        let summaries: Vec<_> = graph.tasks().iter().map(|t| t.summary().to_string()).collect();
        assert_eq!(summaries, vec!["a", "b", "s"]);
        assert!(!graph.mutates_state());
        assert_eq!(graph.root_task_id(), Some(s.id));
    }
}
