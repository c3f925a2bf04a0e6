// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Invariant tests for recipe ordering and selection
//!
//! These tests verify critical invariants on random recipe graphs:
//! 1. Build order - no package comes before one of its dependencies
//! 2. Determinism - the order does not depend on recipe insertion order
//! 3. Closure - a selection contains every dependency of its members

use proptest::prelude::*;
use soma_forge::graph::{GraphError, RecipeGraph};
use soma_forge::recipes::RecipeStore;
use soma_forge::selector;
use soma_forge::types::Recipe;
use std::collections::{HashMap, HashSet};

// =============================================================================
// Test Helpers
// =============================================================================

fn make_recipe(name: &str, deps: &[String]) -> Recipe {
    let yaml = format!(
        "package:\n  name: {name}\nsoma-forge:\n  type: virtual\n  internal-dependencies: [{}]\n",
        deps.join(", ")
    );
    serde_yaml::from_str(&yaml).unwrap()
}

/// Package `pN` may only depend on `pM` with `M < N`, so the graph is acyclic
fn make_store(edges: &[Vec<usize>], reversed: bool) -> RecipeStore {
    let mut recipes: Vec<Recipe> = edges
        .iter()
        .enumerate()
        .map(|(i, deps)| {
            let mut deps: Vec<String> = deps
                .iter()
                .filter(|d| **d < i)
                .map(|d| format!("p{d:02}"))
                .collect();
            deps.sort();
            deps.dedup();
            make_recipe(&format!("p{i:02}"), &deps)
        })
        .collect();
    if reversed {
        recipes.reverse();
    }
    RecipeStore::from_recipes(recipes).unwrap()
}

fn dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..20).prop_flat_map(|n| prop::collection::vec(prop::collection::vec(0..n, 0..4), n))
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn test_sorted_respects_dependencies(edges in dag()) {
        let store = make_store(&edges, false);
        let order = RecipeGraph::from_store(&store).unwrap().sorted().unwrap();
        prop_assert_eq!(order.len(), store.len());

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        for recipe in store.iter() {
            for dependency in recipe.internal_dependencies() {
                prop_assert!(position[dependency.as_str()] < position[recipe.name()]);
            }
        }
    }

    #[test]
    fn test_sorted_is_deterministic(edges in dag()) {
        let forward = RecipeGraph::from_store(&make_store(&edges, false)).unwrap().sorted().unwrap();
        let backward = RecipeGraph::from_store(&make_store(&edges, true)).unwrap().sorted().unwrap();
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn test_selection_is_closed(edges in dag(), pick in 0usize..20) {
        let store = make_store(&edges, false);
        let root = format!("p{:02}", pick % edges.len());
        let selected = selector::select(&store, &[root.clone()], &[]).unwrap();
        prop_assert_eq!(&selected[0], &root);

        let set: HashSet<&str> = selected.iter().map(String::as_str).collect();
        prop_assert_eq!(set.len(), selected.len());
        for name in &selected {
            for dependency in store.read(name).unwrap().internal_dependencies() {
                prop_assert!(set.contains(dependency.as_str()));
            }
        }
    }

    #[test]
    fn test_back_edge_is_a_cycle(edges in dag()) {
        prop_assume!(edges.len() > 1);
        let mut recipes: Vec<Recipe> = store_recipes(&make_store(&edges, false));
        // p00 depends on the last package, which depends on p00 through the chain below
        let last = edges.len() - 1;
        for (i, recipe) in recipes.iter_mut().enumerate() {
            if i == 0 {
                recipe.forge.internal_dependencies = vec![format!("p{last:02}")];
            } else {
                recipe.forge.internal_dependencies.push(format!("p{:02}", i - 1));
                recipe.forge.internal_dependencies.sort();
                recipe.forge.internal_dependencies.dedup();
            }
        }
        let store = RecipeStore::from_recipes(recipes).unwrap();
        let result = RecipeGraph::from_store(&store).unwrap().sorted();
        match result {
            Err(GraphError::Cycle(cycles)) => {
                prop_assert_eq!(cycles.len(), 1);
                prop_assert_eq!(cycles[0].len(), edges.len());
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other),
        }
    }
}

fn store_recipes(store: &RecipeStore) -> Vec<Recipe> {
    store.iter().cloned().collect()
}
