// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Recipe store

use crate::types::Recipe;
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Every recipe of a recipe directory, keyed by package name
#[derive(Debug, Clone, Default)]
pub struct RecipeStore {
    recipes: BTreeMap<String, Recipe>,
    files: BTreeMap<String, PathBuf>,
}

impl RecipeStore {
    /// Load `dir/*.yaml` and `dir/*/recipe.yaml`
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("Recipe directory {} does not exist", dir.display());
        }

        let mut store = Self::default();
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(2) {
            let entry = entry.with_context(|| format!("Failed to scan recipe directory {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_recipe = match entry.depth() {
                1 => entry.path().extension().is_some_and(|ext| ext == "yaml"),
                _ => entry.file_name() == "recipe.yaml",
            };
            if is_recipe {
                files.push(entry.into_path());
            }
        }
        files.sort();

        for file in files {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let recipe: Recipe = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse recipe {}", file.display()))?;
            store.insert(recipe, file)?;
        }

        debug!("Loaded {} recipes from {}", store.len(), dir.display());
        Ok(store)
    }

    /// Build a store from in-memory recipes
    pub fn from_recipes(recipes: impl IntoIterator<Item = Recipe>) -> Result<Self> {
        let mut store = Self::default();
        for recipe in recipes {
            let file = PathBuf::from(format!("{}.yaml", recipe.name()));
            store.insert(recipe, file)?;
        }
        Ok(store)
    }

    fn insert(&mut self, recipe: Recipe, file: PathBuf) -> Result<()> {
        let name = recipe.name().to_string();
        if let Some(existing) = self.files.get(&name) {
            bail!(
                "Package {} is defined twice: {} and {}",
                name,
                existing.display(),
                file.display()
            );
        }
        self.files.insert(name.clone(), file);
        self.recipes.insert(name, recipe);
        Ok(())
    }

    /// Recipe of a package
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.recipes.get(name)
    }

    /// Recipe of a package, failing when unknown
    pub fn read(&self, name: &str) -> Result<&Recipe> {
        self.get(name)
            .with_context(|| format!("No recipe for package {name}"))
    }

    /// File a recipe was loaded from
    #[must_use]
    pub fn path(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    /// Package names in alphabetical order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }

    /// Recipes in package name order
    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.values()
    }

    /// True when `name` has a recipe
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.recipes.contains_key(name)
    }

    /// Number of recipes
    #[must_use]
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    /// True when the store holds no recipe
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PackageType;
    use tempfile::TempDir;

    const SOMA: &str = r"
package:
  name: soma
soma-forge:
  type: interpreted
  components:
    - soma-base
about:
  license: CeCILL-B
";

    const AIMS: &str = r"
package:
  name: aims
requirements:
  build:
    - ${{ compiler('cxx') }}
    - cmake
  run:
    - libxml2 >=2.9
soma-forge:
  internal-dependencies:
    - soma
  components:
    - aims-free
";

    #[cfg(unix)]
    #[test]
    fn test_load_reports_unreadable_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("soma.yaml"), SOMA).unwrap();
        let locked = dir.path().join("aims");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("recipe.yaml"), "package:\n  name: aims\n").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let enforced = fs::read_dir(&locked).is_err();

        let result = RecipeStore::load(dir.path());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        // permissions do not apply to root
        if enforced {
            let message = format!("{:#}", result.unwrap_err());
            assert!(message.contains("Failed to scan recipe directory"));
            assert!(message.contains("aims"));
        }
    }

    #[test]
    fn test_load_flat_and_nested() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("soma.yaml"), SOMA).unwrap();
        fs::create_dir(dir.path().join("aims")).unwrap();
        fs::write(dir.path().join("aims/recipe.yaml"), AIMS).unwrap();
        fs::write(dir.path().join("README.md"), "not a recipe").unwrap();

        let store = RecipeStore::load(dir.path()).unwrap();
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["aims", "soma"]);

        let aims = store.read("aims").unwrap();
        assert_eq!(aims.package_type(), PackageType::Compiled);
        assert_eq!(aims.internal_dependencies(), ["soma"]);
        assert_eq!(store.read("soma").unwrap().package_type(), PackageType::Interpreted);
        assert!(store.read("anatomist").is_err());
        assert!(store.path("aims").unwrap().ends_with("aims/recipe.yaml"));
    }

    #[test]
    fn test_unknown_sections_preserved() {
        let recipe: Recipe = serde_yaml::from_str(SOMA).unwrap();
        assert!(recipe.extra.contains_key("about"));
        let rendered = serde_yaml::to_string(&recipe).unwrap();
        assert!(rendered.contains("license: CeCILL-B"));
    }

    #[test]
    fn test_numeric_version_is_string() {
        let recipe: Recipe =
            serde_yaml::from_str("package:\n  name: brainvisa\n  version: 6.0\n").unwrap();
        assert_eq!(recipe.package.version.as_deref(), Some("6.0"));
        assert_eq!(recipe.package_type(), PackageType::Virtual);
    }

    #[test]
    fn test_duplicate_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("soma.yaml"), SOMA).unwrap();
        fs::write(dir.path().join("soma-copy.yaml"), SOMA).unwrap();
        let err = RecipeStore::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.yaml"), "package: [").unwrap();
        let err = RecipeStore::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
