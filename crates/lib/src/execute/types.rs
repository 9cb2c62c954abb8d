//! Types for the build driver.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::build::{ArtifactError, ExecutorError};
use crate::plan::{CommitError, PlanError};
use crate::util::hash::{Fingerprint, HashError};

/// Where a package is in the build.
///
/// `Pending → Checked → {Reused | Built} → Done`, or one of the terminal
/// failure states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
  /// Waiting for dependencies, or re-queued after its fingerprint moved.
  Pending,
  /// Handed to a worker, which is consulting the stores.
  Checked,
  /// Installed from an existing installation or store artifact.
  Reused,
  /// Installed by running its recipe.
  Built,
  Done,
  Failed,
  /// Not attempted because a dependency failed.
  Skipped,
  /// Not attempted, or interrupted, because the build was stopped.
  Cancelled,
}

impl PackageStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Done | Self::Failed | Self::Skipped | Self::Cancelled)
  }
}

/// Why a single package could not be installed.
#[derive(Debug, Error)]
pub enum PackageError {
  #[error(transparent)]
  Executor(#[from] ExecutorError),

  #[error(transparent)]
  Artifact(#[from] ArtifactError),

  #[error(transparent)]
  Commit(#[from] CommitError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error("I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The artifact stored under a fingerprint describes another build.
  #[error("artifact for {package} carries fingerprint {found}, expected {expected}")]
  FingerprintMismatch {
    package: String,
    expected: Fingerprint,
    found: Fingerprint,
  },

  #[error("worker for {package} stopped: {message}")]
  Worker { package: String, message: String },
}

/// Errors that stop the whole build.
#[derive(Debug, Error)]
pub enum DriverError {
  /// A package's fingerprint kept changing between attempts.
  #[error(
    "{package} did not converge after {attempts} attempts: its inputs changed on every build, \
     the recipes or their sources are inconsistent"
  )]
  NonConvergent { package: String, attempts: u32 },

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error("cannot use work directory {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A package that ended up installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRecord {
  pub name: String,
  pub version: String,
  pub revision: u32,
  pub fingerprint: Fingerprint,
  pub install_root: PathBuf,
  pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPackage {
  pub name: String,
  pub error: String,
}

/// A package that was not attempted because of a failed dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPackage {
  pub name: String,
  pub failed_dependency: String,
}

/// What happened to every package of a build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
  pub built: Vec<PackageRecord>,
  pub reused: Vec<PackageRecord>,
  pub failed: Vec<FailedPackage>,
  pub skipped: Vec<SkippedPackage>,
  pub cancelled: Vec<String>,
  /// Non-fatal problems, e.g. artifacts that could not be published.
  pub warnings: Vec<String>,
  /// Final status of every package in the plan.
  pub statuses: BTreeMap<String, PackageStatus>,
}

impl BuildReport {
  /// Returns true if every package ended up installed.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty() && self.cancelled.is_empty()
  }

  pub fn total(&self) -> usize {
    self.statuses.len()
  }

  pub fn status(&self, name: &str) -> Option<PackageStatus> {
    self.statuses.get(name).copied()
  }

  /// Installed record of `name`, whether built or reused.
  pub fn installed(&self, name: &str) -> Option<&PackageRecord> {
    self.built.iter().chain(self.reused.iter()).find(|r| r.name == name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_report_is_success() {
    let report = BuildReport::default();
    assert!(report.is_success());
    assert_eq!(report.total(), 0);
  }

  #[test]
  fn failures_and_skips_are_not_success() {
    let mut report = BuildReport::default();
    report.skipped.push(SkippedPackage {
      name: "B".to_string(),
      failed_dependency: "A".to_string(),
    });
    assert!(!report.is_success());
  }

  #[test]
  fn report_serializes_statuses_lowercase() {
    let mut report = BuildReport::default();
    report.statuses.insert("A".to_string(), PackageStatus::Done);
    report.statuses.insert("B".to_string(), PackageStatus::Cancelled);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["statuses"]["A"], "done");
    assert_eq!(json["statuses"]["B"], "cancelled");
  }

  #[test]
  fn terminal_states() {
    assert!(PackageStatus::Done.is_terminal());
    assert!(PackageStatus::Skipped.is_terminal());
    assert!(!PackageStatus::Checked.is_terminal());
    assert!(!PackageStatus::Pending.is_terminal());
  }
}
