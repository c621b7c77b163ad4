//! Worker descriptors and capability predicates

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{CadreError, Result};
use crate::task::Task;

/// Resource tier of a worker, analogous to model cost tiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceTier {
    #[serde(alias = "haiku")]
    Light,
    #[default]
    #[serde(alias = "sonnet")]
    Standard,
    #[serde(alias = "opus")]
    Heavy,
}

/// A single compiled trigger
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Case-insensitive match against the intent's keywords
    Keyword(String),
    /// Glob matched against the intent's file paths
    FilePattern { glob: String, regex: Regex },
}

impl Trigger {
    pub fn keyword(word: impl Into<String>) -> Self {
        Self::Keyword(word.into().to_lowercase())
    }

    pub fn file_pattern(glob: impl Into<String>) -> Result<Self> {
        let glob = glob.into();
        let regex = Regex::new(&glob_to_regex(&glob)?)
            .map_err(|e| CadreError::InvalidDefinition(format!("bad file pattern '{glob}': {e}")))?;
        Ok(Self::FilePattern { glob, regex })
    }

    /// Parse a trigger from definition text.
    ///
    /// `keyword:` and `file:` prefixes are explicit. Bare strings are file
    /// patterns when they contain glob metacharacters, a `/`, or start
    /// with `.`; otherwise keywords.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CadreError::InvalidDefinition("empty trigger".into()));
        }
        if let Some(rest) = raw.strip_prefix("keyword:") {
            return Ok(Self::keyword(rest.trim()));
        }
        if let Some(rest) = raw.strip_prefix("file:") {
            return Self::file_pattern(rest.trim());
        }
        if raw.contains(['*', '?', '/', '{', '[']) || raw.starts_with('.') {
            Self::file_pattern(raw)
        } else {
            Ok(Self::keyword(raw))
        }
    }

    fn matches(&self, task: &Task) -> bool {
        match self {
            Self::Keyword(word) => task
                .intent
                .keywords
                .iter()
                .any(|k| k.eq_ignore_ascii_case(word)),
            Self::FilePattern { glob, regex } => task.intent.files.iter().any(|path| {
                if regex.is_match(path) {
                    return true;
                }
                // Patterns without a directory part match on the file name
                !glob.contains('/')
                    && path
                        .rsplit('/')
                        .next()
                        .is_some_and(|name| regex.is_match(name))
            }),
        }
    }

    /// Number of literal (non-wildcard) characters
    fn literal_len(&self) -> usize {
        match self {
            Self::Keyword(word) => word.len(),
            Self::FilePattern { glob, .. } => glob
                .chars()
                .filter(|c| !matches!(c, '*' | '?' | '{' | '}' | ',' | '[' | ']' | '!'))
                .count(),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword(word) => write!(f, "keyword:{word}"),
            Self::FilePattern { glob, .. } => write!(f, "file:{glob}"),
        }
    }
}

/// Translate a glob into an anchored regex.
///
/// Supports `*`, `**/`, `?`, `[...]` / `[!...]` classes and one level of
/// `{a,b}` alternation. Unbalanced brackets are rejected.
fn glob_to_regex(glob: &str) -> Result<String> {
    let unbalanced = |what: &str| {
        CadreError::InvalidDefinition(format!("bad file pattern '{glob}': unbalanced {what}"))
    };

    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    let mut in_group = false;

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                let mut empty = true;
                for member in chars.by_ref() {
                    match member {
                        ']' if !empty => {
                            closed = true;
                            break;
                        }
                        '-' if !empty => out.push('-'),
                        '/' => return Err(unbalanced("'['")),
                        other => out.push_str(&regex::escape(&other.to_string())),
                    }
                    empty = false;
                }
                if !closed {
                    return Err(unbalanced("'['"));
                }
                out.push(']');
            }
            '{' if in_group => return Err(unbalanced("'{'")),
            '{' => {
                in_group = true;
                out.push_str("(?:");
            }
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            '}' => return Err(unbalanced("'}'")),
            ',' if in_group => out.push('|'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    if in_group {
        return Err(unbalanced("'{'"));
    }
    out.push('$');
    Ok(out)
}

/// How specifically a predicate matched a task.
///
/// Ordered by matched trigger count, then total literal length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchScore {
    pub matched: usize,
    pub literal_len: usize,
}

impl PartialOrd for MatchScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MatchScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.matched
            .cmp(&other.matched)
            .then(self.literal_len.cmp(&other.literal_len))
    }
}

/// Pure matching function compiled from a worker's triggers
#[derive(Debug, Clone, Default)]
pub struct CapabilityPredicate {
    triggers: Vec<Trigger>,
}

impl CapabilityPredicate {
    pub fn new(triggers: Vec<Trigger>) -> Self {
        Self { triggers }
    }

    /// Evaluate against a task; `None` when nothing matched
    pub fn evaluate(&self, task: &Task) -> Option<MatchScore> {
        let score = self
            .triggers
            .iter()
            .filter(|t| t.matches(task))
            .fold(MatchScore::default(), |acc, t| MatchScore {
                matched: acc.matched + 1,
                literal_len: acc.literal_len + t.literal_len(),
            });

        (score.matched > 0).then_some(score)
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }
}

/// A specialized worker. Immutable after registry load.
#[derive(Debug, Clone)]
pub struct WorkerDescriptor {
    /// Unique name
    pub name: String,
    pub description: String,
    /// Escalation-resolution category
    pub category: String,
    pub tier: ResourceTier,
    /// Whether invoking this worker can alter persistent project state
    pub mutates_state: bool,
    /// Explicit escalation target, overriding the category mapping
    pub escalates_to: Option<String>,
    predicate: CapabilityPredicate,
}

impl WorkerDescriptor {
    pub fn new(name: impl Into<String>, triggers: Vec<Trigger>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: crate::registry::DEFAULT_CATEGORY.to_string(),
            tier: ResourceTier::default(),
            mutates_state: true,
            escalates_to: None,
            predicate: CapabilityPredicate::new(triggers),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_tier(mut self, tier: ResourceTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.mutates_state = false;
        self
    }

    pub fn escalating_to(mut self, target: impl Into<String>) -> Self {
        self.escalates_to = Some(target.into());
        self
    }

    pub fn predicate(&self) -> &CapabilityPredicate {
        &self.predicate
    }

    pub fn score(&self, task: &Task) -> Option<MatchScore> {
        let score = self.predicate.evaluate(task);
        trace!(worker = %self.name, ?score, "Evaluated capability predicate");
        score
    }
}

/// Shared handle to a registered worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    inner: Arc<WorkerDescriptor>,
}

impl WorkerHandle {
    pub fn new(descriptor: WorkerDescriptor) -> Self {
        Self {
            inner: Arc::new(descriptor),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl std::ops::Deref for WorkerHandle {
    type Target = WorkerDescriptor;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl PartialEq for WorkerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.name == other.inner.name
    }
}

impl Eq for WorkerHandle {}
