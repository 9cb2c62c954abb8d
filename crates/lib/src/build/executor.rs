//! Running build recipes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::recipe::Spec;

#[derive(Debug, Error)]
pub enum ExecutorError {
  #[error("failed to start build of {package}: {source}")]
  Spawn {
    package: String,
    #[source]
    source: std::io::Error,
  },

  #[error("build of {package} failed with exit code {code:?}")]
  Failed { package: String, code: Option<i32> },

  #[error("could not prepare build of {package}: {message}")]
  Prepare { package: String, message: String },
}

/// Everything needed to run one package's recipe.
#[derive(Debug, Clone)]
pub struct BuildJob {
  pub spec: Spec,
  pub arch: String,
  pub work_dir: PathBuf,
  /// Scratch directory the recipe runs in.
  pub build_dir: PathBuf,
  /// Final payload directory the recipe installs into.
  pub install_root: PathBuf,
  pub revision: u32,
  /// Install roots of every dependency, by package name.
  pub dependency_roots: BTreeMap<String, PathBuf>,
  pub jobs: usize,
  /// Pass-through environment from the command line.
  pub env: BTreeMap<String, String>,
  pub docker: Option<String>,
  pub volumes: Vec<String>,
  /// Mirror of upstream repositories, exported as `REFERENCE_SOURCES`.
  pub reference_sources: PathBuf,
}

impl BuildJob {
  /// Environment exported to the recipe.
  ///
  /// Recipe `env` entries override the pass-through environment; the
  /// package variables override both.
  pub fn environment(&self) -> BTreeMap<String, String> {
    let spec = &self.spec;
    let mut env = self.env.clone();
    env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    for (dep, root) in &self.dependency_roots {
      env.insert(root_variable(dep), root.display().to_string());
    }

    let fingerprint = spec.fingerprint.as_ref().map(|fp| fp.to_string()).unwrap_or_default();
    let commit = spec.commit_hash.clone().unwrap_or_default();
    let vars = [
      ("PKGNAME", spec.name.clone()),
      ("PKGVERSION", spec.version.clone()),
      ("PKGREVISION", self.revision.to_string()),
      ("PKGHASH", fingerprint),
      ("COMMIT_HASH", commit),
      ("ARCHITECTURE", self.arch.clone()),
      ("WORK_DIR", self.work_dir.display().to_string()),
      ("BUILDDIR", self.build_dir.display().to_string()),
      ("INSTALLROOT", self.install_root.display().to_string()),
      ("JOBS", self.jobs.to_string()),
      ("REFERENCE_SOURCES", self.reference_sources.display().to_string()),
    ];
    for (key, value) in vars {
      env.insert(key.to_string(), value);
    }
    env
  }
}

/// `<DEP>_ROOT` variable name for a dependency, e.g. `GCC-Toolchain` → `GCC_TOOLCHAIN_ROOT`.
pub fn root_variable(package: &str) -> String {
  format!("{}_ROOT", package.to_uppercase().replace('-', "_"))
}

/// Runs a package's build recipe.
///
/// The executor only has to populate `job.install_root`; packing and
/// publishing are the driver's business.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
  async fn build(&self, job: &BuildJob) -> Result<(), ExecutorError>;
}

/// Runs recipes with `bash -e`, directly or in a container.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
  shell: Option<String>,
}

impl ShellExecutor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Use a different shell binary; it must accept `-e -c <script>`.
  pub fn with_shell(shell: impl Into<String>) -> Self {
    Self {
      shell: Some(shell.into()),
    }
  }

  fn command(&self, job: &BuildJob) -> Command {
    let shell = self.shell.as_deref().unwrap_or("bash");
    let env = job.environment();

    match &job.docker {
      Some(image) => {
        let mut command = Command::new("docker");
        command.args(["run", "--rm"]);
        let work_dir = job.work_dir.display().to_string();
        command.arg("-v").arg(format!("{}:{}", work_dir, work_dir));
        if !job.reference_sources.starts_with(&job.work_dir) {
          let mirror = job.reference_sources.display().to_string();
          command.arg("-v").arg(format!("{}:{}:ro", mirror, mirror));
        }
        for volume in &job.volumes {
          command.arg("-v").arg(volume);
        }
        for (key, value) in &env {
          command.arg("-e").arg(format!("{}={}", key, value));
        }
        command.arg("-w").arg(&job.build_dir);
        command.arg(image).args([shell, "-e", "-c"]).arg(&job.spec.recipe);
        command
      }
      None => {
        let mut command = Command::new(shell);
        command
          .args(["-e", "-c"])
          .arg(&job.spec.recipe)
          .current_dir(&job.build_dir)
          .envs(&env);
        command
      }
    }
  }
}

#[async_trait]
impl BuildExecutor for ShellExecutor {
  async fn build(&self, job: &BuildJob) -> Result<(), ExecutorError> {
    let package = job.spec.name.clone();
    for dir in [&job.build_dir, &job.install_root] {
      tokio::fs::create_dir_all(dir).await.map_err(|e| ExecutorError::Prepare {
        package: package.clone(),
        message: format!("{}: {}", dir.display(), e),
      })?;
    }

    info!(package = %package, revision = job.revision, container = ?job.docker, "running recipe");
    let mut command = self.command(job);
    command.kill_on_drop(true);
    let output = command
      .output()
      .await
      .map_err(|source| ExecutorError::Spawn {
        package: package.clone(),
        source,
      })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.is_empty() {
      debug!(package = %package, stdout = %stdout, "recipe stdout");
    }
    if !stderr.is_empty() {
      debug!(package = %package, stderr = %stderr, "recipe stderr");
    }

    if !output.status.success() {
      return Err(ExecutorError::Failed {
        package,
        code: output.status.code(),
      });
    }
    Ok(())
  }
}
