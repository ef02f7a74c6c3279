// casket-common/src/dependency/resolver.rs
use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, error};

use crate::error::{CasketError, Result};
use crate::loader::CaskLoader;
use crate::model::cask::Cask;

/// The cask dependencies of a root cask, in install order.
///
/// Every dependency appears before any cask that depends on it; the root
/// itself is never part of the result.
#[derive(Debug, Clone)]
pub struct CaskDependencies {
    root: String,
    sorted: Vec<Arc<Cask>>,
}

/// Direct dependencies discovered so far, keyed by token.
struct VisitedGraph {
    casks: Vec<Arc<Cask>>,
    index_by_token: HashMap<String, usize>,
    /// `deps[i]` holds the indices `casks[i]` directly depends on.
    deps: Vec<Vec<usize>>,
}

impl VisitedGraph {
    fn new(root: Arc<Cask>) -> Self {
        let mut index_by_token = HashMap::new();
        index_by_token.insert(root.token.clone(), 0);
        Self {
            casks: vec![root],
            index_by_token,
            deps: vec![Vec::new()],
        }
    }

    fn index_of(&self, token: &str) -> Option<usize> {
        self.index_by_token.get(token).copied()
    }

    fn add(&mut self, cask: Arc<Cask>) -> usize {
        let idx = self.casks.len();
        self.index_by_token.insert(cask.token.clone(), idx);
        self.casks.push(cask);
        self.deps.push(Vec::new());
        idx
    }
}

impl CaskDependencies {
    pub fn new(root: &Cask, loader: &dyn CaskLoader) -> Result<Self> {
        let root_token = root.token.clone();
        let visited = Self::walk(Arc::new(root.clone()), loader)?;

        if visited.deps[0].contains(&0) {
            error!("Cask '{}' lists itself as a dependency", root_token);
            return Err(CasketError::CaskSelfReferencingDependency(root_token));
        }

        let sorted = Self::sort(&visited)?;
        debug!(
            "Cask dependencies of {}: [{}]",
            root_token,
            sorted.iter().map(|c| c.token.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self {
            root: root_token,
            sorted,
        })
    }

    /// Depth-first walk over `depends_on.cask`, loading every cask once.
    fn walk(root: Arc<Cask>, loader: &dyn CaskLoader) -> Result<VisitedGraph> {
        let mut visited = VisitedGraph::new(root);
        let mut pending = vec![0usize];
        let mut expanded = vec![false];

        while let Some(idx) = pending.pop() {
            if expanded[idx] {
                continue;
            }
            expanded[idx] = true;

            let references = visited.casks[idx].depends_on.cask.clone();
            for reference in references {
                let dep_idx = match visited.index_of(&reference) {
                    Some(existing) => existing,
                    None => {
                        debug!(
                            "Loading dependency '{}' of {}",
                            reference, visited.casks[idx].token
                        );
                        let cask = loader.load(&reference)?;
                        match visited.index_of(&cask.token) {
                            Some(existing) => existing,
                            None => {
                                expanded.push(false);
                                visited.add(Arc::new(cask))
                            }
                        }
                    }
                };
                if !visited.deps[idx].contains(&dep_idx) {
                    visited.deps[idx].push(dep_idx);
                }
                if !expanded[dep_idx] {
                    pending.push(dep_idx);
                }
            }
        }
        Ok(visited)
    }

    fn sort(visited: &VisitedGraph) -> Result<Vec<Arc<Cask>>> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..visited.casks.len()).map(|i| graph.add_node(i)).collect();
        for (dependent, deps) in visited.deps.iter().enumerate() {
            for &dep in deps {
                // Edges point from a dependency to the cask that needs it.
                graph.add_edge(nodes[dep], nodes[dependent], ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .map(|n| graph[n])
                .filter(|&i| i != 0)
                .map(|i| Arc::clone(&visited.casks[i]))
                .collect()),
            Err(cycle) => {
                let root = &visited.casks[0].token;
                error!(
                    "Dependency cycle detected for {} at '{}'",
                    root,
                    visited.casks[graph[cycle.node_id()]].token
                );
                let mut largest: Vec<NodeIndex> = Vec::new();
                for component in tarjan_scc(&graph) {
                    let cyclic = component.len() > 1
                        || graph.contains_edge(component[0], component[0]);
                    if cyclic && component.len() > largest.len() {
                        largest = component;
                    }
                }
                let members = largest
                    .into_iter()
                    .map(|n| graph[n])
                    .filter(|&i| i != 0)
                    .map(|i| visited.casks[i].token.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(CasketError::CaskCyclicDependency(root.clone(), members))
            }
        }
    }

    pub fn root_token(&self) -> &str {
        &self.root
    }

    pub fn casks(&self) -> &[Arc<Cask>] {
        &self.sorted
    }

    pub fn tokens(&self) -> Vec<&str> {
        self.sorted.iter().map(|c| c.token.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn into_casks(self) -> Vec<Arc<Cask>> {
        self.sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::depends_on::DependsOn;

    struct MapLoader(HashMap<String, Cask>);

    impl MapLoader {
        fn new(entries: &[(&str, &[&str])]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(token, deps)| (token.to_string(), cask(token, deps)))
                    .collect(),
            )
        }
    }

    impl CaskLoader for MapLoader {
        fn load(&self, reference: &str) -> Result<Cask> {
            self.0.get(reference).cloned().ok_or_else(|| {
                CasketError::CaskUnavailable(reference.to_string(), "not found".to_string())
            })
        }

        fn load_installed(&self, token: &str) -> Result<Cask> {
            self.load(token)
        }
    }

    fn cask(token: &str, deps: &[&str]) -> Cask {
        Cask {
            token: token.to_string(),
            depends_on: DependsOn {
                cask: deps.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn position(order: &[&str], token: &str) -> usize {
        order.iter().position(|t| *t == token).unwrap()
    }

    #[test]
    fn orders_dependencies_before_dependents_and_excludes_root() {
        let loader = MapLoader::new(&[("b", &["d"]), ("c", &["d"]), ("d", &[])]);
        let root = cask("a", &["b", "c"]);
        let deps = CaskDependencies::new(&root, &loader).unwrap();
        let order = deps.tokens();

        assert_eq!(order.len(), 3);
        assert!(!order.contains(&"a"));
        assert!(position(&order, "d") < position(&order, "b"));
        assert!(position(&order, "d") < position(&order, "c"));
    }

    #[test]
    fn shared_dependency_is_listed_once() {
        let loader = MapLoader::new(&[("b", &["c"]), ("c", &[])]);
        let root = cask("a", &["b", "c"]);
        let deps = CaskDependencies::new(&root, &loader).unwrap();
        assert_eq!(deps.tokens(), vec!["c", "b"]);
    }

    #[test]
    fn no_dependencies_yields_empty_order() {
        let loader = MapLoader::new(&[]);
        let deps = CaskDependencies::new(&cask("a", &[]), &loader).unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn direct_self_reference_is_reported_before_sorting() {
        let loader = MapLoader::new(&[]);
        let err = CaskDependencies::new(&cask("a", &["a"]), &loader).unwrap_err();
        match err {
            CasketError::CaskSelfReferencingDependency(token) => assert_eq!(token, "a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cycle_names_members_other_than_root() {
        let loader = MapLoader::new(&[("b", &["c"]), ("c", &["b"])]);
        let err = CaskDependencies::new(&cask("a", &["b"]), &loader).unwrap_err();
        match err {
            CasketError::CaskCyclicDependency(root, members) => {
                assert_eq!(root, "a");
                let mut names: Vec<&str> = members.split(", ").collect();
                names.sort_unstable();
                assert_eq!(names, vec!["b", "c"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cycle_through_root_excludes_root_from_message() {
        let loader = MapLoader::new(&[("b", &["a"])]);
        let err = CaskDependencies::new(&cask("a", &["b"]), &loader).unwrap_err();
        match err {
            CasketError::CaskCyclicDependency(root, members) => {
                assert_eq!(root, "a");
                assert_eq!(members, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unavailable_dependency_propagates_loader_error() {
        let loader = MapLoader::new(&[]);
        let err = CaskDependencies::new(&cask("a", &["missing"]), &loader).unwrap_err();
        assert!(err.is_unavailable());
    }
}
