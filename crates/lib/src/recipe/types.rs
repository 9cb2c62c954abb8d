use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use crate::util::hash::Fingerprint;

/// The YAML header of a recipe, as written by recipe authors.
///
/// Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecipeHeader {
  pub package: String,
  #[serde(default, deserialize_with = "scalar_string")]
  pub version: Option<String>,
  #[serde(default, deserialize_with = "scalar_string")]
  pub tag: Option<String>,
  #[serde(default)]
  pub requires: Vec<String>,
  #[serde(default)]
  pub build_requires: Vec<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub source: Option<String>,
  #[serde(default)]
  pub write_repo: Option<String>,
  #[serde(default)]
  pub incremental_recipe: Option<String>,
}

/// Accept `version: 6.32` or `version: v6-32-01` alike.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
  match value {
    None | Some(serde_yaml::Value::Null) => Ok(None),
    Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
    Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
    Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
    Some(other) => Err(serde::de::Error::custom(format!("expected a scalar, got {:?}", other))),
  }
}

/// The resolved description of one package in a build.
///
/// Created by the registry; the planner later fills in `commit_hash`,
/// `fingerprint`, `store_path` and `alias_path`. `revision` belongs to the
/// build driver and is reset at the start of every attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spec {
  pub name: String,
  /// Version with `/` replaced, safe to use as a path component.
  pub version: String,
  /// Upstream reference; defaults to the unnormalized version.
  pub tag: String,
  /// `runtime_requires` followed by `build_requires`, without duplicates.
  pub requires: Vec<String>,
  pub build_requires: Vec<String>,
  pub runtime_requires: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub source: Option<String>,
  pub write_repo: Option<String>,
  pub recipe: String,
  pub incremental_recipe: Option<String>,

  pub commit_hash: Option<String>,
  pub fingerprint: Option<Fingerprint>,
  /// Store location relative to a store root: `<arch>/store/<shard>/<fingerprint>`.
  pub store_path: Option<PathBuf>,
  /// Alias location relative to a store root: `<arch>/<name>`.
  pub alias_path: Option<PathBuf>,

  #[serde(skip)]
  pub revision: Option<u32>,
}

impl Spec {
  /// Build a spec from a parsed header and the recipe body.
  ///
  /// Requirement lists are taken verbatim; filtering happens in the registry.
  pub fn from_header(header: RecipeHeader, recipe: String) -> Self {
    let raw_version = header.version.unwrap_or_default();
    let tag = header.tag.filter(|t| !t.is_empty()).unwrap_or_else(|| raw_version.clone());

    Self {
      name: header.package,
      version: normalize_version(&raw_version),
      tag,
      requires: header.requires,
      build_requires: header.build_requires,
      runtime_requires: Vec::new(),
      env: header.env,
      source: header.source.filter(|s| !s.is_empty()),
      write_repo: header.write_repo,
      recipe,
      incremental_recipe: header.incremental_recipe,
      commit_hash: None,
      fingerprint: None,
      store_path: None,
      alias_path: None,
      revision: None,
    }
  }

  /// File name of this package's artifact inside its store directory.
  pub fn artifact_name(&self, arch: &str) -> String {
    format!("{}-{}.{}.tar.gz", self.name, self.version, arch)
  }

  /// Version directory name for a given revision, e.g. `v1.2-3`.
  pub fn version_dir(&self, revision: u32) -> String {
    format!("{}-{}", self.version, revision)
  }
}

/// Make a version usable as a single path component.
pub fn normalize_version(version: &str) -> String {
  version.replace('/', "_")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn header(yaml: &str) -> RecipeHeader {
    serde_yaml::from_str(yaml).unwrap()
  }

  #[test]
  fn tag_defaults_to_raw_version() {
    let spec = Spec::from_header(header("package: zlib\nversion: release/1.2\n"), String::new());
    assert_eq!(spec.version, "release_1.2");
    assert_eq!(spec.tag, "release/1.2");
  }

  #[test]
  fn explicit_tag_is_kept() {
    let spec = Spec::from_header(header("package: zlib\nversion: v1.2.11\ntag: abc123\n"), String::new());
    assert_eq!(spec.version, "v1.2.11");
    assert_eq!(spec.tag, "abc123");
  }

  #[test]
  fn numeric_versions_are_accepted() {
    let spec = Spec::from_header(header("package: ROOT\nversion: 6.32\n"), String::new());
    assert_eq!(spec.version, "6.32");
  }

  #[test]
  fn unknown_fields_are_ignored() {
    let h = header("package: cmake\nversion: v3\nprefer_system: .*\nsystem_requirement_missing: foo\n");
    assert_eq!(h.package, "cmake");
  }

  #[test]
  fn artifact_and_version_dir_names() {
    let spec = Spec::from_header(header("package: zlib\nversion: v1.2\n"), String::new());
    assert_eq!(spec.artifact_name("x86_64"), "zlib-v1.2.x86_64.tar.gz");
    assert_eq!(spec.version_dir(3), "v1.2-3");
  }
}
