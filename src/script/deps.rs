//! Soft dependency tracking between scripts.
//!
//! Dependencies are declared in script metadata and recorded as directed
//! edges. An edge may point at a name with no registered script; that is a
//! warning condition, never a load failure.

use std::collections::HashMap;

/// Aggregate dependency statistics for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DependencyStats {
    /// Number of registered scripts.
    pub registered_scripts: usize,
    /// Edges whose target is a registered script.
    pub resolved_edges: usize,
    /// Edges whose target is not registered.
    pub unresolved_edges: usize,
}

/// Directed script dependency graph.
#[derive(Debug, Default)]
pub struct DependencyManager {
    /// Forward edges: script name -> declared dependency names.
    edges: HashMap<String, Vec<String>>,
}

impl DependencyManager {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a script and its declared dependencies.
    ///
    /// Returns the dependency names that are currently unresolved so the
    /// caller can emit warnings.
    pub fn register_script(&mut self, name: &str, dependencies: &[String]) -> Vec<String> {
        self.edges
            .insert(name.to_string(), dependencies.to_vec());

        dependencies
            .iter()
            .filter(|d| !self.edges.contains_key(*d))
            .cloned()
            .collect()
    }

    /// Remove a script and its outgoing edges. Edges from other scripts that
    /// point at the removed name remain, and become unresolved.
    pub fn unregister_script(&mut self, name: &str) {
        self.edges.remove(name);
    }

    /// Whether a script is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// A script's declared dependencies, in declaration order.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.edges.get(name).cloned().unwrap_or_default()
    }

    /// Scripts that declare `name` as a dependency, sorted.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .edges
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == name))
            .map(|(script, _)| script.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Aggregate statistics over the graph.
    pub fn stats(&self) -> DependencyStats {
        let mut stats = DependencyStats {
            registered_scripts: self.edges.len(),
            ..Default::default()
        };

        for deps in self.edges.values() {
            for dep in deps {
                if self.edges.contains_key(dep) {
                    stats.resolved_edges += 1;
                } else {
                    stats.unresolved_edges += 1;
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_register_resolved() {
        let mut graph = DependencyManager::new();

        graph.register_script("pathing", &[]);
        let unresolved = graph.register_script("miner", &deps(&["pathing"]));

        assert!(unresolved.is_empty());
        assert_eq!(graph.dependencies_of("miner"), vec!["pathing"]);
    }

    #[test]
    fn test_register_unresolved_reports_names() {
        let mut graph = DependencyManager::new();

        let unresolved = graph.register_script("miner", &deps(&["pathing", "banking"]));
        assert_eq!(unresolved, vec!["pathing", "banking"]);

        // Loading never blocks; the edges are recorded anyway
        assert_eq!(graph.dependencies_of("miner"), vec!["pathing", "banking"]);
    }

    #[test]
    fn test_unresolved_count_increases() {
        let mut graph = DependencyManager::new();
        graph.register_script("a", &[]);
        assert_eq!(graph.stats().unresolved_edges, 0);

        graph.register_script("b", &deps(&["ghost"]));
        assert_eq!(graph.stats().unresolved_edges, 1);
        assert_eq!(graph.stats().resolved_edges, 0);
        assert_eq!(graph.stats().registered_scripts, 2);
    }

    #[test]
    fn test_edge_resolves_when_target_loads() {
        let mut graph = DependencyManager::new();
        graph.register_script("miner", &deps(&["pathing"]));
        assert_eq!(graph.stats().unresolved_edges, 1);

        graph.register_script("pathing", &[]);
        let stats = graph.stats();
        assert_eq!(stats.unresolved_edges, 0);
        assert_eq!(stats.resolved_edges, 1);
    }

    #[test]
    fn test_dependents_reverse_lookup() {
        let mut graph = DependencyManager::new();
        graph.register_script("pathing", &[]);
        graph.register_script("miner", &deps(&["pathing"]));
        graph.register_script("fisher", &deps(&["pathing"]));
        graph.register_script("idler", &[]);

        assert_eq!(graph.dependents_of("pathing"), vec!["fisher", "miner"]);
        assert!(graph.dependents_of("idler").is_empty());
    }

    #[test]
    fn test_unregister_keeps_incoming_edges() {
        let mut graph = DependencyManager::new();
        graph.register_script("pathing", &[]);
        graph.register_script("miner", &deps(&["pathing"]));

        graph.unregister_script("pathing");

        // miner's declaration survives, now unresolved
        assert_eq!(graph.dependencies_of("miner"), vec!["pathing"]);
        assert_eq!(graph.stats().unresolved_edges, 1);
        assert_eq!(graph.dependents_of("pathing"), vec!["miner"]);
    }

    #[test]
    fn test_reregister_replaces_edges() {
        let mut graph = DependencyManager::new();
        graph.register_script("miner", &deps(&["pathing"]));
        graph.register_script("miner", &deps(&["banking"]));

        assert_eq!(graph.dependencies_of("miner"), vec!["banking"]);
    }

    #[test]
    fn test_dependencies_of_unknown() {
        let graph = DependencyManager::new();
        assert!(graph.dependencies_of("ghost").is_empty());
        assert!(!graph.is_registered("ghost"));
    }
}
