//! # Cadre
//!
//! Orchestration engine for a roster of specialized workers.
//!
//! A submission is planned into a task graph, every task is routed to the
//! most specific capable worker, and the graph runs under one of three
//! topologies. Each worker invocation is wrapped in a bounded retry loop
//! that escalates to a higher authority when the worker gives up.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            ORCHESTRATOR                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐               │
//! │  │   Planner    │  │    Router    │  │ Safety Gate  │               │
//! │  └──────────────┘  └──────────────┘  └──────────────┘               │
//! └────────────────────────────┬────────────────────────────────────────┘
//!                              │ routed graph
//!                              ▼
//!          ┌───────────────────────────────────────────┐
//!          │             TOPOLOGY EXECUTOR             │
//!          │    parallel  │  serial  │  hub-and-spoke  │
//!          └──────┬───────────────┬───────────────┬────┘
//!                 ▼               ▼               ▼
//!          ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//!          │ Retry Mgr   │ │ Retry Mgr   │ │ Retry Mgr   │
//!          └──────┬──────┘ └──────┬──────┘ └──────┬──────┘
//!                 ▼               ▼               ▼
//!             ┌──────┐        ┌──────┐        ┌──────┐
//!             │Worker│──esc──▶│ Lead │──esc──▶│ Arch │
//!             └──────┘        └──────┘        └──────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Worker**: a named capability with a predicate and an escalation target
//! - **Envelope**: isolated, append-only context handed between workers
//! - **Safety Gate**: blocks state-mutating work on a protected environment
//! - **Escalation**: hand-off of a failing task to a higher authority
//! - **Session**: the runtime context of one submission

pub mod channel;
pub mod config;
pub mod definition;
pub mod envelope;
pub mod error;
pub mod events;
pub mod executor;
pub mod hierarchy;
pub mod invoker;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod router;
pub mod safety;
pub mod session;
pub mod task;
pub mod worker;

pub use channel::{EventSink, EventStream};
pub use config::{EngineConfig, EscalationSettings};
pub use definition::WorkerDefinition;
pub use envelope::{ContextEnvelope, TraceEntry};
pub use error::{CadreError, FailureCategory, Result};
pub use events::EngineEvent;
pub use executor::{BranchOutcome, BranchStatus, TopologyExecutor};
pub use hierarchy::EscalationHierarchy;
pub use invoker::{WorkerInvoker, WorkerOutcome};
pub use logging::{init_logging, LoggingSettings};
pub use orchestrator::{DefaultPlanner, Orchestrator, Planner, Submission, TaskResult};
pub use registry::WorkerRegistry;
pub use retry::{
    AttemptRecord, EscalationRecord, EscalationResolution, InvocationState, RetryManager,
    RetryState,
};
pub use router::Router;
pub use safety::{
    BranchClassification, Confirmation, EnvironmentQuery, EnvironmentSnapshot, GitEnvironment,
    SafetyDecision, SafetyGate, SafetyResolution, StaticEnvironment,
};
pub use session::{MutationSlot, Session, SessionHandle};
pub use task::{Intent, Priority, Task, TaskGraph, TaskId, TopologyHint};
pub use worker::{ResourceTier, Trigger, WorkerDescriptor, WorkerHandle};
