//! Safety gate - pre-flight check for mutating work
//!
//! The gate is a pure function of the task, an environment snapshot and an
//! explicit confirmation. It remembers nothing between calls; a caller that
//! obtained confirmation re-evaluates with [`Confirmation::Granted`].

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::task::Task;

/// Branch classification reported by the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchClassification {
    Protected,
    Unprotected,
}

/// Environment state captured once per submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Branch name or other marker
    pub marker: String,
    pub classification: BranchClassification,
}

impl EnvironmentSnapshot {
    pub fn protected(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            classification: BranchClassification::Protected,
        }
    }

    pub fn unprotected(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            classification: BranchClassification::Unprotected,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.classification == BranchClassification::Protected
    }
}

/// Source of environment snapshots (e.g. version-control status)
pub trait EnvironmentQuery: Send + Sync {
    fn current_branch_classification(&self) -> anyhow::Result<EnvironmentSnapshot>;
}

/// Fixed snapshot, for embedding callers and tests
#[derive(Debug, Clone)]
pub struct StaticEnvironment {
    snapshot: EnvironmentSnapshot,
}

impl StaticEnvironment {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self { snapshot }
    }
}

impl EnvironmentQuery for StaticEnvironment {
    fn current_branch_classification(&self) -> anyhow::Result<EnvironmentSnapshot> {
        Ok(self.snapshot.clone())
    }
}

/// Classifies the current git branch against a protected list
#[derive(Debug, Clone)]
pub struct GitEnvironment {
    repo: PathBuf,
    protected_branches: Vec<String>,
}

impl GitEnvironment {
    pub fn new(repo: impl Into<PathBuf>, protected_branches: Vec<String>) -> Self {
        Self {
            repo: repo.into(),
            protected_branches,
        }
    }

    /// Use the protected branch list from engine configuration
    pub fn from_config(repo: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        Self::new(repo, config.protected_branches.clone())
    }

    pub fn classify(&self, branch: &str) -> BranchClassification {
        if self.protected_branches.iter().any(|p| p == branch) {
            BranchClassification::Protected
        } else {
            BranchClassification::Unprotected
        }
    }
}

impl EnvironmentQuery for GitEnvironment {
    fn current_branch_classification(&self) -> anyhow::Result<EnvironmentSnapshot> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .output()?;

        if !output.status.success() {
            anyhow::bail!(
                "git rev-parse failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let classification = self.classify(&branch);
        debug!(branch = %branch, ?classification, "Queried git branch");
        Ok(EnvironmentSnapshot {
            marker: branch,
            classification,
        })
    }
}

/// Caller's answer to a confirmation request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confirmation {
    #[default]
    None,
    Granted,
    Declined,
}

/// Outcome of a gate evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyResolution {
    Proceed,
    BlockedPendingConfirmation,
    Aborted,
}

impl fmt::Display for SafetyResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Proceed => "proceed",
            Self::BlockedPendingConfirmation => "blocked pending confirmation",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub environment: Option<EnvironmentSnapshot>,
    pub required_confirmation: bool,
    pub resolution: SafetyResolution,
}

impl SafetyDecision {
    pub fn proceeds(&self) -> bool {
        self.resolution == SafetyResolution::Proceed
    }

    /// Decision used when the environment could not be queried
    pub fn environment_unavailable() -> Self {
        Self {
            environment: None,
            required_confirmation: true,
            resolution: SafetyResolution::Aborted,
        }
    }
}

/// Stateless pre-flight gate
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyGate;

impl SafetyGate {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        task: &Task,
        environment: Option<&EnvironmentSnapshot>,
        confirmation: Confirmation,
    ) -> SafetyDecision {
        if !task.mutates_state {
            return SafetyDecision {
                environment: environment.cloned(),
                required_confirmation: false,
                resolution: SafetyResolution::Proceed,
            };
        }

        // Fail closed when the environment is unknown
        let Some(env) = environment else {
            warn!(task_id = %task.id, "No environment snapshot for mutating task");
            return SafetyDecision::environment_unavailable();
        };

        let resolution = match (env.is_protected(), confirmation) {
            (false, _) => SafetyResolution::Proceed,
            (true, Confirmation::Granted) => SafetyResolution::Proceed,
            (true, Confirmation::Declined) => SafetyResolution::Aborted,
            (true, Confirmation::None) => SafetyResolution::BlockedPendingConfirmation,
        };

        debug!(
            task_id = %task.id,
            marker = %env.marker,
            %resolution,
            "Safety gate evaluated"
        );

        SafetyDecision {
            environment: Some(env.clone()),
            required_confirmation: env.is_protected(),
            resolution,
        }
    }
}
