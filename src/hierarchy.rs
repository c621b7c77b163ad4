//! Escalation hierarchy management
//!
//! Each worker points at most at one escalation target; the targets form a
//! forest whose roots are the highest authorities. Peer loops (A escalates
//! to B, B escalates back to A) are tolerated in the map but flattened when
//! walked: a path never revisits a worker and never exceeds a depth limit.

use std::collections::{HashMap, HashSet};

/// Node in the escalation hierarchy
#[derive(Debug, Clone)]
struct HierarchyNode {
    target: Option<String>,
    escalated_from: Vec<String>,
}

/// Manages the worker → escalation-target tree
#[derive(Debug, Clone, Default)]
pub struct EscalationHierarchy {
    nodes: HashMap<String, HierarchyNode>,
}

impl EscalationHierarchy {
    /// Create a new empty hierarchy
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker and the target it escalates to.
    ///
    /// A worker naming itself is treated as having no target.
    pub fn add_worker(&mut self, name: &str, target: Option<&str>) {
        let target = target.filter(|t| *t != name).map(str::to_string);

        if let Some(t) = &target {
            self.nodes
                .entry(t.clone())
                .or_insert_with(|| HierarchyNode {
                    target: None,
                    escalated_from: Vec::new(),
                })
                .escalated_from
                .push(name.to_string());
        }

        let node = self.nodes.entry(name.to_string()).or_insert_with(|| HierarchyNode {
            target: None,
            escalated_from: Vec::new(),
        });
        node.target = target;
    }

    /// Direct escalation target of a worker
    pub fn target(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).and_then(|n| n.target.as_deref())
    }

    /// Workers that escalate directly to `name`
    pub fn escalated_from(&self, name: &str) -> Vec<String> {
        self.nodes
            .get(name)
            .map(|n| n.escalated_from.clone())
            .unwrap_or_default()
    }

    /// Workers with no escalation target
    pub fn roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.target.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        roots.sort();
        roots
    }

    /// Escalation path starting above `name`, at most `max_depth` hops,
    /// stopping before any worker already on the path.
    pub fn path(&self, name: &str, max_depth: usize) -> Vec<String> {
        let mut visited = HashSet::from([name.to_string()]);
        let mut path = Vec::new();
        let mut current = self.target(name);

        while let Some(next) = current {
            if path.len() >= max_depth || !visited.insert(next.to_string()) {
                break;
            }
            path.push(next.to_string());
            current = self.target(next);
        }

        path
    }

    /// Number of hops from `name` to a root, ignoring loops
    pub fn depth(&self, name: &str) -> usize {
        self.path(name, self.nodes.len()).len()
    }

    /// Whether following targets from `name` loops back on itself
    pub fn has_loop(&self, name: &str) -> bool {
        let mut visited = HashSet::from([name]);
        let mut current = self.target(name);
        while let Some(next) = current {
            if !visited.insert(next) {
                return true;
            }
            current = self.target(next);
        }
        false
    }

    /// Get total worker count
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if hierarchy is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_creation() {
        let hierarchy = EscalationHierarchy::new();
        assert!(hierarchy.is_empty());
        assert!(hierarchy.roots().is_empty());
    }

    #[test]
    fn test_self_target_ignored() {
        let mut hierarchy = EscalationHierarchy::new();
        hierarchy.add_worker("architect", Some("architect"));
        assert!(hierarchy.target("architect").is_none());
        assert_eq!(hierarchy.roots(), vec!["architect".to_string()]);
    }

    #[test]
    fn test_chain_and_depth() {
        let mut hierarchy = EscalationHierarchy::new();
        hierarchy.add_worker("architect", None);
        hierarchy.add_worker("lead", Some("architect"));
        hierarchy.add_worker("coder", Some("lead"));
        hierarchy.add_worker("tester", Some("lead"));

        assert_eq!(hierarchy.depth("architect"), 0);
        assert_eq!(hierarchy.depth("lead"), 1);
        assert_eq!(hierarchy.depth("coder"), 2);
        assert_eq!(hierarchy.path("coder", 5), vec!["lead", "architect"]);
        assert_eq!(hierarchy.path("coder", 1), vec!["lead"]);

        let mut from_lead = hierarchy.escalated_from("lead");
        from_lead.sort();
        assert_eq!(from_lead, vec!["coder", "tester"]);
    }

    #[test]
    fn test_peer_loop_flattened() {
        let mut hierarchy = EscalationHierarchy::new();
        hierarchy.add_worker("a", Some("b"));
        hierarchy.add_worker("b", Some("a"));

        assert!(hierarchy.has_loop("a"));
        assert_eq!(hierarchy.path("a", 10), vec!["b"]);
        assert_eq!(hierarchy.depth("b"), 1);
    }

    #[test]
    fn test_nonexistent() {
        let hierarchy = EscalationHierarchy::new();
        assert!(hierarchy.target("ghost").is_none());
        assert!(hierarchy.path("ghost", 3).is_empty());
        assert!(hierarchy.escalated_from("ghost").is_empty());
    }
}
