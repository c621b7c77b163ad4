//! Engine configuration

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CadreError, Result};
use crate::logging::LoggingSettings;

/// Default retry bound per worker invocation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default number of hops along an escalation chain
pub const DEFAULT_MAX_ESCALATION_DEPTH: usize = 2;

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per worker invocation before escalating
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Deadline applied when a task carries none
    #[serde(default = "default_deadline_secs")]
    pub default_deadline_secs: u64,
    /// Concurrent worker invocations across fan-out branches
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Hops along the escalation chain before giving up
    #[serde(default = "default_max_escalation_depth")]
    pub max_escalation_depth: usize,
    /// Branch names classified as protected
    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,
    #[serde(default)]
    pub escalation: EscalationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_deadline_secs() -> u64 {
    300
}

fn default_max_parallel() -> usize {
    5
}

fn default_max_escalation_depth() -> usize {
    DEFAULT_MAX_ESCALATION_DEPTH
}

fn default_protected_branches() -> Vec<String> {
    vec!["main".to_string(), "master".to_string()]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            default_deadline_secs: default_deadline_secs(),
            max_parallel: default_max_parallel(),
            max_escalation_depth: default_max_escalation_depth(),
            protected_branches: default_protected_branches(),
            escalation: EscalationSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CadreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading engine config");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CadreError::Config("max_attempts must be at least 1".into()));
        }
        if self.max_parallel == 0 {
            return Err(CadreError::Config("max_parallel must be at least 1".into()));
        }
        if self.default_deadline_secs == 0 {
            return Err(CadreError::Config("default_deadline_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.default_deadline_secs)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline_secs = deadline.as_secs().max(1);
        self
    }
}

/// Category → escalation target mapping, resolved at registry load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationSettings {
    /// Target for categories without an explicit entry
    #[serde(default)]
    pub default: Option<String>,
    /// Worker category → target worker name
    #[serde(default)]
    pub targets: HashMap<String, String>,
}

impl EscalationSettings {
    pub fn with_default(mut self, target: impl Into<String>) -> Self {
        self.default = Some(target.into());
        self
    }

    pub fn with_target(mut self, category: impl Into<String>, target: impl Into<String>) -> Self {
        self.targets.insert(category.into(), target.into());
        self
    }

    /// Target for a category, falling back to the default
    pub fn target_for(&self, category: &str) -> Option<&str> {
        self.targets
            .get(category)
            .or(self.default.as_ref())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_escalation_depth, 2);
        assert_eq!(config.protected_branches, vec!["main", "master"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            max_attempts = 5
            protected_branches = ["trunk"]

            [escalation]
            default = "architect"

            [escalation.targets]
            testing = "qa-lead"

            [logging]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_parallel, 5);
        assert_eq!(config.protected_branches, vec!["trunk"]);
        assert_eq!(config.escalation.target_for("testing"), Some("qa-lead"));
        assert_eq!(config.escalation.target_for("backend"), Some("architect"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = EngineConfig::from_toml_str("max_attempts = 0").unwrap_err();
        assert!(matches!(err, CadreError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadre.toml");
        std::fs::write(&path, "max_parallel = 2\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_parallel, 2);

        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.toml")),
            Err(CadreError::Io(_))
        ));
    }
}
