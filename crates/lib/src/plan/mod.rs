//! Build planning.
//!
//! Turns requested package names into a [`Plan`]: the resolved closure in
//! dependency order, every spec pinned to a commit, fingerprinted and
//! addressed in the store. Planning is single-threaded and finishes before
//! any build starts; structural errors surface here with no partial output.

pub mod commit;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::consts::MAIN_PACKAGES;
use crate::execute::dag::{BuildGraph, GraphError};
use crate::recipe::{RecipeError, RecipeSource, Registry, Spec};
use crate::store::paths::address;
use crate::util::hash::{Fingerprint, HashError, fingerprint};

pub use commit::{CommitError, CommitResolver, TagCommitResolver, pin_commit};

#[derive(Debug, Error)]
pub enum PlanError {
  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error(transparent)]
  Commit(#[from] CommitError),
}

/// Everything the build driver needs to know before it starts.
#[derive(Debug, Clone)]
pub struct Plan {
  pub specs: BTreeMap<String, Spec>,
  /// Dependencies-first build order.
  pub order: Vec<String>,
  /// Requested packages, by canonical name.
  pub roots: Vec<String>,
  pub graph: BuildGraph,
}

impl Plan {
  /// Resolve, order, pin, fingerprint and address the closure of `roots`.
  pub fn prepare<S: RecipeSource>(
    config: &Config,
    source: S,
    resolver: &dyn CommitResolver,
    roots: &[String],
  ) -> Result<Self, PlanError> {
    let closure = Registry::new(config, source).resolve(roots)?;
    let mut specs = closure.specs;

    let graph = BuildGraph::from_specs(&specs)?;
    let order = graph.order()?;
    debug!(order = ?order, "build order");

    for name in &order {
      if let Some(spec) = specs.get_mut(name) {
        let commit = pin_commit(spec, resolver)?;
        if let Some(source) = &spec.source {
          debug!(package = %name, source = %source, tag = %spec.tag, commit = %commit, "pinned commit");
        }
        spec.commit_hash = Some(commit);
      }
    }

    fingerprint_all(&mut specs, &order)?;
    assign_addresses(&mut specs, &config.arch);

    let plan = Self {
      specs,
      order,
      roots: closure.roots,
      graph,
    };

    if let Some(main) = plan.main_package() {
      let commit = plan.specs[main].commit_hash.as_deref().unwrap_or_default();
      debug!(package = %main, commit = %commit, "main package");
    }

    Ok(plan)
  }

  /// The package a build is indexed by.
  ///
  /// The last package in build order, unless one of the flagship packages
  /// is present, in which case the earliest-ordered of those.
  pub fn main_package(&self) -> Option<&str> {
    self
      .order
      .iter()
      .find(|name| MAIN_PACKAGES.contains(&name.to_lowercase().as_str()))
      .or_else(|| self.order.last())
      .map(String::as_str)
  }

  pub fn spec(&self, name: &str) -> Option<&Spec> {
    self.specs.get(name)
  }

  /// Specs in build order.
  pub fn ordered_specs(&self) -> impl Iterator<Item = &Spec> {
    self.order.iter().filter_map(|name| self.specs.get(name))
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }
}

/// Fingerprint every spec, walking `order` so that dependencies are always
/// done before their dependents.
pub fn fingerprint_all(
  specs: &mut BTreeMap<String, Spec>,
  order: &[String],
) -> Result<BTreeMap<String, Fingerprint>, HashError> {
  let mut known = BTreeMap::new();
  for name in order {
    let Some(spec) = specs.get_mut(name) else {
      continue;
    };
    let fp = fingerprint(spec, &known)?;
    debug!(package = %name, fingerprint = %fp, "computed fingerprint");
    spec.fingerprint = Some(fp.clone());
    known.insert(name.clone(), fp);
  }
  Ok(known)
}

/// Fill in `store_path` and `alias_path` for every fingerprinted spec.
pub fn assign_addresses(specs: &mut BTreeMap<String, Spec>, arch: &str) {
  for spec in specs.values_mut() {
    if let Some(fp) = &spec.fingerprint {
      let addr = address(arch, &spec.name, fp);
      spec.store_path = Some(addr.store_path);
      spec.alias_path = Some(addr.alias_path);
    }
  }
}
