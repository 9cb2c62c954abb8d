//! Pinning packages to an upstream commit.

use thiserror::Error;

use crate::consts::NO_SOURCE_COMMIT;
use crate::recipe::Spec;

#[derive(Debug, Error)]
#[error("could not resolve {tag} in {repo}: {message}")]
pub struct CommitError {
  pub repo: String,
  pub tag: String,
  pub message: String,
}

/// Turns a source and tag into the commit reference a build is pinned to.
///
/// The result is opaque: it only feeds the fingerprint.
pub trait CommitResolver: Send + Sync {
  fn resolve(&self, source: &str, tag: &str) -> Result<String, CommitError>;
}

/// Uses the tag itself as the commit reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagCommitResolver;

impl CommitResolver for TagCommitResolver {
  fn resolve(&self, _source: &str, tag: &str) -> Result<String, CommitError> {
    Ok(tag.to_string())
  }
}

/// Commit reference for `spec`: [`NO_SOURCE_COMMIT`] without a source,
/// otherwise whatever `resolver` says.
pub fn pin_commit(spec: &Spec, resolver: &dyn CommitResolver) -> Result<String, CommitError> {
  match &spec.source {
    Some(source) => resolver.resolve(source, &spec.tag),
    None => Ok(NO_SOURCE_COMMIT.to_string()),
  }
}
