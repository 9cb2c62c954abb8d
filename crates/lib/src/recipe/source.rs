//! Where recipe documents come from.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::consts::RECIPE_EXTENSION;

use super::RecipeError;

/// Looks up the raw recipe document for a package.
///
/// Lookups are keyed by the lower-cased package name.
pub trait RecipeSource {
  fn lookup(&self, name: &str) -> Result<String, RecipeError>;
}

/// Recipes stored as `<dir>/<name>.sh` files.
#[derive(Debug, Clone)]
pub struct DirRecipeSource {
  dir: PathBuf,
}

impl DirRecipeSource {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn recipe_path(&self, name: &str) -> PathBuf {
    self.dir.join(format!("{}.{}", name.to_lowercase(), RECIPE_EXTENSION))
  }

  /// Git `HEAD` of the recipe directory, if it is a repository.
  ///
  /// Failure to ask git is logged and otherwise ignored.
  pub fn revision(&self) -> Option<String> {
    let output = Command::new("git")
      .arg("-C")
      .arg(&self.dir)
      .args(["rev-parse", "HEAD"])
      .output();

    match output {
      Ok(out) if out.status.success() => {
        let head = String::from_utf8_lossy(&out.stdout).trim().to_string();
        debug!(dir = %self.dir.display(), revision = %head, "recipe tree revision");
        Some(head)
      }
      Ok(out) => {
        warn!(
          dir = %self.dir.display(),
          stderr = %String::from_utf8_lossy(&out.stderr).trim(),
          "could not determine recipe tree revision"
        );
        None
      }
      Err(e) => {
        warn!(dir = %self.dir.display(), error = %e, "could not run git");
        None
      }
    }
  }
}

impl RecipeSource for DirRecipeSource {
  fn lookup(&self, name: &str) -> Result<String, RecipeError> {
    let path = self.recipe_path(name);
    std::fs::read_to_string(&path).map_err(|e| match e.kind() {
      io::ErrorKind::NotFound => RecipeError::Missing {
        name: name.to_string(),
        message: format!("no recipe at {}", path.display()),
      },
      _ => RecipeError::Missing {
        name: name.to_string(),
        message: format!("could not read {}: {}", path.display(), e),
      },
    })
  }
}

/// Recipes held in memory, keyed case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecipeSource {
  recipes: HashMap<String, String>,
}

impl MemoryRecipeSource {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, name: &str, content: impl Into<String>) {
    self.recipes.insert(name.to_lowercase(), content.into());
  }

  pub fn with(mut self, name: &str, content: impl Into<String>) -> Self {
    self.insert(name, content);
    self
  }
}

impl RecipeSource for MemoryRecipeSource {
  fn lookup(&self, name: &str) -> Result<String, RecipeError> {
    self
      .recipes
      .get(&name.to_lowercase())
      .cloned()
      .ok_or_else(|| RecipeError::Missing {
        name: name.to_string(),
        message: "not found".to_string(),
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn dir_source_reads_lowercased_file() {
    let temp = tempdir().unwrap();
    std::fs::write(temp.path().join("root.sh"), "package: ROOT\n---\n").unwrap();

    let source = DirRecipeSource::new(temp.path());
    let content = source.lookup("ROOT").unwrap();
    assert!(content.starts_with("package: ROOT"));
  }

  #[test]
  fn dir_source_missing_file() {
    let temp = tempdir().unwrap();
    let source = DirRecipeSource::new(temp.path());
    let err = source.lookup("nope").unwrap_err();
    assert!(matches!(err, RecipeError::Missing { .. }));
  }

  #[test]
  fn memory_source_is_case_insensitive() {
    let source = MemoryRecipeSource::new().with("ROOT", "package: ROOT\n---\n");
    assert!(source.lookup("root").is_ok());
    assert!(source.lookup("zlib").is_err());
  }

  #[test]
  fn plain_directory_has_no_revision() {
    let temp = tempdir().unwrap();
    assert!(DirRecipeSource::new(temp.path()).revision().is_none());
  }
}
