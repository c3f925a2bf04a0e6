// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Recipe dependency graph and build ordering

use crate::recipes::RecipeStore;
use crate::selector::PackageSelector;
use crate::types::split_requirement;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Graph construction and ordering failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A recipe depends on a package that has no recipe
    #[error("package {package} depends on unknown package {dependency}")]
    UnknownDependency {
        /// Package declaring the dependency
        package: String,
        /// Missing dependency
        dependency: String,
    },

    /// A package is not part of the graph
    #[error("package {0} is not in the graph")]
    UnknownPackage(String),

    /// Internal dependencies form at least one cycle
    #[error("dependency cycle between {}", format_cycles(.0))]
    Cycle(Vec<Vec<String>>),
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| c.join(", "))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Internal dependency graph; edges go from a dependency to its dependents
#[derive(Debug, Clone, Default)]
pub struct RecipeGraph {
    /// The underlying directed graph
    graph: DiGraph<String, ()>,
    /// Map from package name to node index
    node_indices: HashMap<String, NodeIndex>,
}

impl RecipeGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph of every recipe in the store
    pub fn from_store(store: &RecipeStore) -> Result<Self, GraphError> {
        Self::from_packages(store, store.names())
    }

    /// Graph of `packages`; dependencies outside of `packages` are left out
    pub fn from_packages<'a>(
        store: &RecipeStore,
        packages: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        let packages: Vec<&str> = packages.into_iter().collect();
        for package in &packages {
            graph.add_package(package);
        }
        for package in packages {
            let recipe = store
                .get(package)
                .ok_or_else(|| GraphError::UnknownPackage(package.to_string()))?;
            for dependency in recipe.internal_dependencies() {
                if !store.contains(dependency) {
                    return Err(GraphError::UnknownDependency {
                        package: package.to_string(),
                        dependency: dependency.clone(),
                    });
                }
                if graph.contains(dependency) {
                    graph.add_dependency(package, dependency)?;
                }
            }
        }
        Ok(graph)
    }

    /// Add a package node (idempotent)
    pub fn add_package(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.node_indices.insert(name.to_string(), idx);
        idx
    }

    /// Record that `package` depends on `dependency` (idempotent)
    pub fn add_dependency(&mut self, package: &str, dependency: &str) -> Result<(), GraphError> {
        let to = self.index(package)?;
        let from = self.index(dependency)?;
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    fn index(&self, name: &str) -> Result<NodeIndex, GraphError> {
        self.node_indices
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownPackage(name.to_string()))
    }

    /// True when the package is a node of the graph
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.node_indices.contains_key(name)
    }

    /// Get node count
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get edge count
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if the graph is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.node_indices.get(name) else {
            return vec![];
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Direct dependencies of a package, sorted
    #[must_use]
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Packages depending directly on a package, sorted
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Packages ordered so that no package comes before its dependencies.
    ///
    /// Among packages whose dependencies are all emitted, the smallest name
    /// comes first.
    pub fn sorted(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
            .collect();
        let mut ready: BTreeSet<(&str, NodeIndex)> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&idx, _)| (self.graph[idx].as_str(), idx))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some((name, idx)) = ready.pop_first() {
            order.push(name.to_string());
            for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert((self.graph[dependent].as_str(), dependent));
                    }
                }
            }
        }

        if order.len() == self.graph.node_count() {
            Ok(order)
        } else {
            Err(GraphError::Cycle(self.cycles()))
        }
    }

    /// Strongly connected components forming cycles, names sorted
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                let mut names: Vec<String> = scc.iter().map(|&i| self.graph[i].clone()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Export to DOT format for Graphviz.
    ///
    /// Edges point from a package to its dependencies. With `with_external`,
    /// run requirements that are not recipes are drawn as extra nodes.
    pub fn to_dot(
        &self,
        store: &RecipeStore,
        selector: &PackageSelector,
        with_external: bool,
    ) -> Result<String, GraphError> {
        let mut dot = String::from("digraph recipes {\n");
        dot.push_str("  node [shape=box, color=black, style=filled];\n");

        let mut linked = HashSet::new();
        let mut external = BTreeSet::new();
        for package in self.sorted()? {
            if !selector.is_match(&package) {
                continue;
            }
            let recipe = store
                .get(&package)
                .ok_or_else(|| GraphError::UnknownPackage(package.clone()))?;
            dot.push_str(&format!(
                "  \"{}\" [fillcolor=\"{}\"];\n",
                package,
                recipe.package_type().dot_color()
            ));
            for dependency in recipe.internal_dependencies() {
                if linked.insert((package.clone(), dependency.clone())) {
                    dot.push_str(&format!("  \"{package}\" -> \"{dependency}\";\n"));
                }
            }
            if with_external {
                for requirement in recipe.requirements.run_specs() {
                    if requirement.starts_with('$') {
                        continue;
                    }
                    let Some((name, _)) = split_requirement(requirement) else {
                        continue;
                    };
                    if store.contains(name) {
                        continue;
                    }
                    if linked.insert((package.clone(), name.to_string())) {
                        dot.push_str(&format!("  \"{package}\" -> \"{name}\";\n"));
                    }
                    external.insert(name.to_string());
                }
            }
        }
        for name in external {
            dot.push_str(&format!("  \"{name}\" [fillcolor=\"aliceblue\"];\n"));
        }

        dot.push_str("}\n");
        Ok(dot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ForgeSection, PackageSection, PackageType, Recipe, Requirements};
    use std::collections::BTreeMap;

    fn make_recipe(name: &str, kind: PackageType, deps: &[&str], run: &[&str]) -> Recipe {
        Recipe {
            package: PackageSection {
                name: name.into(),
                version: None,
                extra: BTreeMap::new(),
            },
            build: None,
            requirements: Requirements {
                run: run.iter().map(|r| serde_yaml::Value::from(*r)).collect(),
                ..Requirements::default()
            },
            forge: ForgeSection {
                kind: Some(kind),
                internal_dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
                components: vec![],
            },
            extra: BTreeMap::new(),
        }
    }

    fn make_store() -> RecipeStore {
        RecipeStore::from_recipes([
            make_recipe("soma", PackageType::Interpreted, &[], &["numpy"]),
            make_recipe("aims", PackageType::Compiled, &["soma"], &["libxml2 >=2.9", "boost>=1.80", "${{ pin_compatible('zlib') }}"]),
            make_recipe("anatomist", PackageType::Compiled, &["aims", "soma"], &["soma"]),
            make_recipe("brainvisa", PackageType::Virtual, &["anatomist", "aims"], &[]),
        ])
        .unwrap()
    }

    #[test]
    fn test_sorted_respects_dependencies() {
        let store = make_store();
        let graph = RecipeGraph::from_store(&store).unwrap();
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 5);
        assert_eq!(
            graph.sorted().unwrap(),
            vec!["soma", "aims", "anatomist", "brainvisa"]
        );
    }

    #[test]
    fn test_sorted_ties_broken_by_name() {
        let store = RecipeStore::from_recipes([
            make_recipe("zeta", PackageType::Interpreted, &[], &[]),
            make_recipe("alpha", PackageType::Interpreted, &[], &[]),
            make_recipe("mid", PackageType::Interpreted, &["zeta"], &[]),
        ])
        .unwrap();
        let graph = RecipeGraph::from_store(&store).unwrap();
        assert_eq!(graph.sorted().unwrap(), vec!["alpha", "zeta", "mid"]);
    }

    #[test]
    fn test_cycle_detected() {
        let store = RecipeStore::from_recipes([
            make_recipe("a", PackageType::Compiled, &["b"], &[]),
            make_recipe("b", PackageType::Compiled, &["c"], &[]),
            make_recipe("c", PackageType::Compiled, &["a"], &[]),
            make_recipe("d", PackageType::Compiled, &[], &[]),
        ])
        .unwrap();
        let graph = RecipeGraph::from_store(&store).unwrap();
        let err = graph.sorted().unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle(vec![vec!["a".into(), "b".into(), "c".into()]])
        );
        assert_eq!(err.to_string(), "dependency cycle between a, b, c");
    }

    #[test]
    fn test_unknown_dependency() {
        let store = RecipeStore::from_recipes([make_recipe("a", PackageType::Compiled, &["ghost"], &[])]).unwrap();
        assert!(matches!(
            RecipeGraph::from_store(&store),
            Err(GraphError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_subset_drops_outside_edges() {
        let store = make_store();
        let graph = RecipeGraph::from_packages(&store, ["anatomist", "aims"]).unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.dependencies("anatomist"), vec!["aims"]);
        assert_eq!(graph.dependents("aims"), vec!["anatomist"]);
    }

    #[test]
    fn test_to_dot() {
        let store = make_store();
        let graph = RecipeGraph::from_store(&store).unwrap();
        let dot = graph.to_dot(&store, &PackageSelector::all(), false).unwrap();
        insta::assert_snapshot!(dot.trim_end(), @r#"
        digraph recipes {
          node [shape=box, color=black, style=filled];
          "soma" [fillcolor="bisque"];
          "aims" [fillcolor="aquamarine"];
          "aims" -> "soma";
          "anatomist" [fillcolor="aquamarine"];
          "anatomist" -> "aims";
          "anatomist" -> "soma";
          "brainvisa" [fillcolor="darkolivegreen2"];
          "brainvisa" -> "anatomist";
          "brainvisa" -> "aims";
        }
        "#);
    }

    #[test]
    fn test_to_dot_external_and_filter() {
        let store = make_store();
        let graph = RecipeGraph::from_store(&store).unwrap();
        let selector = PackageSelector::new(&["a*".to_string()]).unwrap();
        let dot = graph.to_dot(&store, &selector, true).unwrap();
        assert!(dot.contains("\"aims\" -> \"libxml2\";"));
        assert!(dot.contains("\"libxml2\" [fillcolor=\"aliceblue\"];"));
        assert!(dot.contains("\"aims\" -> \"boost\";"));
        assert!(!dot.contains(">=1.80"));
        assert!(!dot.contains("pin_compatible"));
        assert!(!dot.contains("numpy"));
        // anatomist run-depends on soma, which is a recipe, not an external node
        assert!(!dot.contains("\"soma\" [fillcolor=\"aliceblue\"]"));
        assert!(!dot.contains("\"brainvisa\""));
    }
}
