//! Build configuration.
//!
//! A [`Config`] value is assembled once (usually by the CLI) and threaded
//! through the registry, the planner and the build driver. Nothing in the
//! crate reads process-wide settings.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::consts::{DEFAULT_PROFILE, DEFAULTS_PREFIX, MAX_BUILD_ATTEMPTS, TARS_DIR};

const SSH_PREFIX: &str = "ssh://";
const READ_WRITE_SUFFIX: &str = "::rw";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("you can NOT specify '::rw' and a write store at the same time")]
  ConflictingStores,

  #[error("store transport not available for {0}")]
  UnsupportedTransport(String),

  #[error("invalid environment entry '{0}': expected KEY=VALUE")]
  InvalidEnv(String),

  #[error("container builds need a target architecture")]
  MissingArch,

  #[error("number of jobs must be at least 1")]
  InvalidJobs,
}

/// Where artifacts are looked up and published.
///
/// The remote store is only read from; the write store only receives
/// publishes. They may point at the same location but are toggled
/// independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
  pub remote: Option<PathBuf>,
  pub write: Option<PathBuf>,
}

impl StoreConfig {
  /// Normalize the remote/write store flags.
  ///
  /// - a remote store suffixed with `::rw` doubles as the write store
  /// - `::rw` together with an explicit write store is rejected
  /// - any development package disables the write store entirely
  pub fn from_flags(remote: Option<&str>, write: Option<&str>, devel: &[String]) -> Result<Self, ConfigError> {
    let remote = remote.filter(|s| !s.is_empty());
    let mut write = write.filter(|s| !s.is_empty()).map(parse_location).transpose()?;

    let remote = match remote {
      Some(r) if r.ends_with(READ_WRITE_SUFFIX) => {
        if write.is_some() {
          return Err(ConfigError::ConflictingStores);
        }
        let location = parse_location(r.trim_end_matches(READ_WRITE_SUFFIX))?;
        write = Some(location.clone());
        Some(location)
      }
      Some(r) => Some(parse_location(r)?),
      None => None,
    };

    if !devel.is_empty() && write.is_some() {
      info!(devel = ?devel, "write store disabled since development packages were given");
      write = None;
    }

    Ok(Self { remote, write })
  }
}

fn parse_location(location: &str) -> Result<PathBuf, ConfigError> {
  if location.starts_with(SSH_PREFIX) {
    return Err(ConfigError::UnsupportedTransport(location.to_string()));
  }
  Ok(PathBuf::from(location))
}

/// Configuration for a whole build.
#[derive(Debug, Clone)]
pub struct Config {
  /// Directory holding `<name>.sh` recipes.
  pub recipe_dir: PathBuf,

  /// Absolute work directory: installs, build areas and the local store.
  pub work_dir: PathBuf,

  /// Target architecture, matched by requirement patterns.
  pub arch: String,

  /// Active defaults profile; every package implicitly build-requires
  /// `defaults-<profile>`.
  pub defaults: String,

  /// Packages removed from the closure and from every requirement list.
  pub disable: BTreeSet<String>,

  /// Development packages. Their presence disables the write store.
  pub devel: Vec<String>,

  /// Upper bound on concurrently running package builds.
  pub jobs: usize,

  /// Per-package attempt ceiling of the convergence loop.
  pub max_attempts: u32,

  /// Container image to run recipes in, if any.
  pub docker: Option<String>,

  /// Environment passed through to every recipe.
  pub env: BTreeMap<String, String>,

  /// Extra volumes mounted into build containers.
  pub volumes: Vec<String>,

  /// Mirror of upstream sources.
  pub reference_sources: PathBuf,

  pub stores: StoreConfig,

  /// Keep building independent subtrees after a package fails.
  pub keep_going: bool,
}

impl Config {
  pub fn new(recipe_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>, arch: impl Into<String>) -> Self {
    let work_dir = work_dir.into();
    Self {
      recipe_dir: recipe_dir.into(),
      reference_sources: work_dir.join("MIRROR"),
      work_dir,
      arch: arch.into(),
      defaults: DEFAULT_PROFILE.to_string(),
      disable: BTreeSet::new(),
      devel: Vec::new(),
      jobs: 1,
      max_attempts: MAX_BUILD_ATTEMPTS,
      docker: None,
      env: BTreeMap::new(),
      volumes: Vec::new(),
      stores: StoreConfig::default(),
      keep_going: false,
    }
  }

  /// Name of the implicit defaults package for the active profile.
  pub fn defaults_package(&self) -> String {
    format!("{}{}", DEFAULTS_PREFIX, self.defaults)
  }

  /// Package names compare without regard to letter case, like recipe lookup.
  pub fn is_disabled(&self, name: &str) -> bool {
    self.disable.iter().any(|d| d.eq_ignore_ascii_case(name))
  }

  /// Root of the local artifact store.
  pub fn local_store_root(&self) -> PathBuf {
    self.work_dir.join(TARS_DIR)
  }

  /// Check invariants the CLI cannot express through argument types.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.jobs == 0 {
      return Err(ConfigError::InvalidJobs);
    }
    if self.docker.is_some() && self.arch.is_empty() {
      return Err(ConfigError::MissingArch);
    }
    Ok(())
  }
}

/// Builder image used for container builds on `arch`, e.g. `slc7_x86-64` → `alisw/slc7-builder`.
pub fn docker_image_for(arch: &str) -> String {
  let family = arch.split('_').next().unwrap_or(arch);
  format!("alisw/{}-builder", family)
}

/// Split a comma separated flag value, trimming blanks.
pub fn split_list(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

/// Parse `KEY=VALUE` pass-through environment entries.
pub fn parse_env(entries: &[String]) -> Result<BTreeMap<String, String>, ConfigError> {
  entries
    .iter()
    .map(|entry| match entry.split_once('=') {
      Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
      _ => Err(ConfigError::InvalidEnv(entry.clone())),
    })
    .collect()
}

/// Resolve `path` against the current directory without requiring it to exist.
pub fn absolute(path: &Path) -> std::io::Result<PathBuf> {
  if path.is_absolute() {
    Ok(path.to_path_buf())
  } else {
    Ok(std::env::current_dir()?.join(path))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rw_suffix_makes_remote_the_write_store() {
    let stores = StoreConfig::from_flags(Some("/mnt/store::rw"), None, &[]).unwrap();
    assert_eq!(stores.remote, Some(PathBuf::from("/mnt/store")));
    assert_eq!(stores.write, Some(PathBuf::from("/mnt/store")));
  }

  #[test]
  fn rw_suffix_conflicts_with_write_store() {
    let err = StoreConfig::from_flags(Some("/mnt/store::rw"), Some("/other"), &[]).unwrap_err();
    assert!(matches!(err, ConfigError::ConflictingStores));
  }

  #[test]
  fn roles_are_independent() {
    let stores = StoreConfig::from_flags(Some("/remote"), None, &[]).unwrap();
    assert_eq!(stores.remote, Some(PathBuf::from("/remote")));
    assert!(stores.write.is_none());

    let stores = StoreConfig::from_flags(None, Some("/write"), &[]).unwrap();
    assert!(stores.remote.is_none());
    assert_eq!(stores.write, Some(PathBuf::from("/write")));
  }

  #[test]
  fn devel_packages_disable_write_store() {
    let devel = vec!["O2".to_string()];
    let stores = StoreConfig::from_flags(Some("/mnt/store::rw"), None, &devel).unwrap();
    assert_eq!(stores.remote, Some(PathBuf::from("/mnt/store")));
    assert!(stores.write.is_none());
  }

  #[test]
  fn ssh_stores_are_rejected() {
    let err = StoreConfig::from_flags(Some("ssh://host:/store"), None, &[]).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedTransport(_)));
  }

  #[test]
  fn docker_image_uses_platform_family() {
    assert_eq!(docker_image_for("slc7_x86-64"), "alisw/slc7-builder");
    assert_eq!(docker_image_for("ubuntu2004"), "alisw/ubuntu2004-builder");
  }

  #[test]
  fn split_list_trims_and_drops_blanks() {
    assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
    assert!(split_list("").is_empty());
  }

  #[test]
  fn parse_env_requires_key() {
    let env = parse_env(&["A=1".to_string(), "B=x=y".to_string()]).unwrap();
    assert_eq!(env["A"], "1");
    assert_eq!(env["B"], "x=y");
    assert!(parse_env(&["=1".to_string()]).is_err());
    assert!(parse_env(&["novalue".to_string()]).is_err());
  }

  #[test]
  fn defaults_package_follows_profile() {
    let mut config = Config::new("alidist", "/sw", "slc7_x86-64");
    assert_eq!(config.defaults_package(), "defaults-release");
    config.defaults = "o2".to_string();
    assert_eq!(config.defaults_package(), "defaults-o2");
  }

  #[test]
  fn disable_ignores_letter_case() {
    let mut config = Config::new("alidist", "/sw", "x86_64");
    config.disable.insert("root".to_string());
    assert!(config.is_disabled("ROOT"));
    assert!(config.is_disabled("root"));
    assert!(!config.is_disabled("rootless"));
  }

  #[test]
  fn validate_rejects_zero_jobs() {
    let mut config = Config::new("alidist", "/sw", "x86_64");
    config.jobs = 0;
    assert!(matches!(config.validate(), Err(ConfigError::InvalidJobs)));
  }
}
