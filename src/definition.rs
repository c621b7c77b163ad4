//! Worker definition documents
//!
//! Workers are declared as Markdown files with YAML front-matter:
//!
//! ```text
//! ---
//! name: test-runner
//! description: Runs the suite when `tests` or `ci` change
//! model_tier: light
//! proactive_triggers: ["testing", "tests/**/*.rs"]
//! mutates_state: false
//! ---
//! Persona body (opaque to the engine)
//! ```

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CadreError, Result};
use crate::worker::{ResourceTier, Trigger, WorkerDescriptor};

/// Structured worker definition, as read from front-matter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub model_tier: ResourceTier,
    #[serde(default)]
    pub proactive_triggers: Vec<String>,
    #[serde(default = "default_mutates_state")]
    pub mutates_state: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub escalates_to: Option<String>,
}

fn default_mutates_state() -> bool {
    true
}

impl WorkerDefinition {
    /// Parse a Markdown document with YAML front-matter
    pub fn from_markdown(content: &str) -> Result<Self> {
        let front = extract_frontmatter(content).ok_or_else(|| {
            CadreError::InvalidDefinition("missing front-matter block".into())
        })?;
        Self::from_yaml(front)
    }

    /// Parse a bare YAML record
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let def: Self = serde_yaml::from_str(yaml)
            .map_err(|e| CadreError::InvalidDefinition(e.to_string()))?;
        if def.name.trim().is_empty() {
            return Err(CadreError::InvalidDefinition("worker name is empty".into()));
        }
        Ok(def)
    }

    /// Compile the definition into a descriptor.
    ///
    /// Backtick-quoted terms in the description become extra keyword
    /// triggers.
    pub fn compile(&self) -> Result<WorkerDescriptor> {
        let mut triggers = self
            .proactive_triggers
            .iter()
            .map(|raw| Trigger::parse(raw))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| CadreError::InvalidDefinition(format!("{}: {e}", self.name)))?;

        for term in description_terms(&self.description) {
            let already = triggers
                .iter()
                .any(|t| matches!(t, Trigger::Keyword(k) if *k == term));
            if !already {
                triggers.push(Trigger::keyword(term));
            }
        }

        debug!(worker = %self.name, triggers = triggers.len(), "Compiled worker definition");

        let mut descriptor = WorkerDescriptor::new(self.name.trim(), triggers)
            .with_description(self.description.clone())
            .with_tier(self.model_tier);
        if let Some(category) = &self.category {
            descriptor = descriptor.with_category(category.clone());
        }
        if let Some(target) = &self.escalates_to {
            descriptor = descriptor.escalating_to(target.clone());
        }
        if !self.mutates_state {
            descriptor = descriptor.read_only();
        }
        Ok(descriptor)
    }
}

/// Front-matter text between the leading `---` fences
fn extract_frontmatter(content: &str) -> Option<&str> {
    let content = content.trim_start_matches('\u{feff}');
    let rest = content.strip_prefix("---")?;
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(&rest[..offset]);
        }
        offset += line.len();
    }
    None
}

static BACKTICK_TERM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"`([^`\s]+)`").ok());

fn description_terms(description: &str) -> Vec<String> {
    let Some(re) = BACKTICK_TERM.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(description)
        .map(|c| c[1].to_lowercase())
        .collect()
}

/// Load every `*.md` definition in a directory, sorted by file name.
///
/// Files without front-matter are skipped with a warning; malformed
/// front-matter is an error.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<WorkerDefinition>> {
    let dir = dir.as_ref();
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    let mut defs = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path)?;
        if extract_frontmatter(&content).is_none() {
            warn!(path = %path.display(), "Skipping file without front-matter");
            continue;
        }
        let def = WorkerDefinition::from_markdown(&content).map_err(|e| {
            CadreError::InvalidDefinition(format!("{}: {e}", path.display()))
        })?;
        defs.push(def);
    }

    debug!(dir = %dir.display(), count = defs.len(), "Loaded worker definitions");
    Ok(defs)
}
