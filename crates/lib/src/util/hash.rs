//! Package fingerprints.
//!
//! A fingerprint identifies everything that goes into building a package:
//! its recipe text, version, name, pinned commit, environment, and the
//! fingerprints of its direct dependencies. Chaining dependency fingerprints
//! makes a change anywhere upstream change every dependent's fingerprint, so
//! a store entry is never reused against stale dependencies.
//!
//! Each field is written as `tag \0 length value`, with absent or empty
//! values replaced by [`HASH_SENTINEL`], so no two distinct inputs share an
//! encoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::consts::{HASH_SENTINEL, STORE_SHARD_LEN};
use crate::recipe::Spec;

/// A package fingerprint: lowercase hex SHA-256, 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Leading characters naming the store shard directory.
  pub fn shard(&self) -> &str {
    let end = STORE_SHARD_LEN.min(self.0.len());
    &self.0[..end]
  }
}

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Error)]
pub enum HashError {
  /// A dependency was not fingerprinted before its dependent.
  #[error("cannot fingerprint {package}: dependency {dependency} has no fingerprint yet")]
  MissingDependency { package: String, dependency: String },
}

struct FieldWriter {
  hasher: Sha256,
}

impl FieldWriter {
  fn new() -> Self {
    Self { hasher: Sha256::new() }
  }

  fn field(&mut self, tag: &str, value: Option<&str>) {
    let value = value.filter(|v| !v.is_empty()).unwrap_or(HASH_SENTINEL);
    self.hasher.update(tag.as_bytes());
    self.hasher.update([0u8]);
    self.hasher.update((value.len() as u64).to_be_bytes());
    self.hasher.update(value.as_bytes());
  }

  fn count(&mut self, tag: &str, n: usize) {
    self.hasher.update(tag.as_bytes());
    self.hasher.update([0u8]);
    self.hasher.update((n as u64).to_be_bytes());
  }

  fn finish(self) -> Fingerprint {
    Fingerprint(hex::encode(self.hasher.finalize()))
  }
}

/// Compute the fingerprint of `spec`.
///
/// `known` must already hold the fingerprint of every name in
/// `spec.requires`; callers walk packages in dependency order.
pub fn fingerprint(spec: &Spec, known: &BTreeMap<String, Fingerprint>) -> Result<Fingerprint, HashError> {
  let mut deps: Vec<&str> = spec.requires.iter().map(String::as_str).collect();
  deps.sort_unstable();
  deps.dedup();

  let mut w = FieldWriter::new();
  w.field("recipe", Some(&spec.recipe));
  w.field("version", Some(&spec.version));
  w.field("package", Some(&spec.name));
  w.field("commit", spec.commit_hash.as_deref());

  w.count("env", spec.env.len());
  for (key, value) in &spec.env {
    w.field("env-key", Some(key));
    w.field("env-value", Some(value));
  }

  w.count("requires", deps.len());
  for dep in deps {
    let dep_fp = known.get(dep).ok_or_else(|| HashError::MissingDependency {
      package: spec.name.clone(),
      dependency: dep.to_string(),
    })?;
    w.field("dep-name", Some(dep));
    w.field("dep-hash", Some(dep_fp.as_str()));
  }

  Ok(w.finish())
}
