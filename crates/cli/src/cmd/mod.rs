mod build;
mod plan;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use aligot_lib::config::{Config, StoreConfig, absolute, docker_image_for, parse_env, split_list};
use aligot_lib::consts::DEFAULT_PROFILE;
use aligot_lib::recipe::DirRecipeSource;

pub use build::cmd_build;
pub use plan::cmd_plan;

/// Arguments shared by `build` and `plan`.
#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Packages to build
  #[arg(required = true)]
  pub packages: Vec<String>,

  /// Directory holding the recipes
  #[arg(short = 'c', long = "config-dir", default_value = "alidist")]
  pub config_dir: PathBuf,

  /// Work directory for installations, build areas and the local store
  #[arg(short = 'w', long = "work-dir", default_value = "sw")]
  pub work_dir: PathBuf,

  /// Target architecture (defaults to the host)
  #[arg(short = 'a', long = "architecture")]
  pub architecture: Option<String>,

  /// Number of packages to build at once
  #[arg(short = 'j', long)]
  pub jobs: Option<usize>,

  /// Development packages (comma separated); disables the write store
  #[arg(long)]
  pub devel: Vec<String>,

  /// Run recipes inside a container
  #[arg(long)]
  pub docker: bool,

  /// Container image to use instead of the architecture's builder image
  #[arg(long = "docker-image")]
  pub docker_image: Option<String>,

  /// Environment passed to every recipe, as KEY=VALUE
  #[arg(short = 'e', long = "env")]
  pub env: Vec<String>,

  /// Extra volume for container builds
  #[arg(short = 'v', long = "volume")]
  pub volumes: Vec<String>,

  /// Mirror directory of upstream sources
  #[arg(long = "reference-sources")]
  pub reference_sources: Option<PathBuf>,

  /// Store to fetch prebuilt artifacts from; suffix with ::rw to also publish there
  #[arg(long = "remote-store")]
  pub remote_store: Option<String>,

  /// Store to publish built artifacts to
  #[arg(long = "write-store")]
  pub write_store: Option<String>,

  /// Packages to leave out of the build (comma separated)
  #[arg(long)]
  pub disable: Vec<String>,

  /// Defaults profile
  #[arg(long, default_value = DEFAULT_PROFILE)]
  pub defaults: String,

  /// Keep building independent packages after a failure
  #[arg(long = "keep-going")]
  pub keep_going: bool,
}

impl BuildArgs {
  /// Assemble the build configuration from the command line.
  pub fn config(&self) -> Result<Config> {
    let work_dir = absolute(&self.work_dir).context("Failed to resolve work directory")?;
    let recipe_dir = absolute(&self.config_dir).context("Failed to resolve recipe directory")?;
    let arch = self.architecture.clone().unwrap_or_else(host_architecture);

    let mut config = Config::new(
      dunce::simplified(&recipe_dir).to_path_buf(),
      dunce::simplified(&work_dir).to_path_buf(),
      arch,
    );
    config.defaults = self.defaults.clone();
    config.disable = self.disable.iter().flat_map(|d| split_list(d)).collect();
    config.devel = self.devel.iter().flat_map(|d| split_list(d)).collect();
    config.jobs = self.jobs.unwrap_or_else(default_jobs);
    config.env = parse_env(&self.env)?;
    config.volumes = self.volumes.clone();
    if self.docker || self.docker_image.is_some() {
      config.docker = Some(
        self
          .docker_image
          .clone()
          .unwrap_or_else(|| docker_image_for(&config.arch)),
      );
    }
    if let Some(mirror) = &self.reference_sources {
      config.reference_sources = absolute(mirror).context("Failed to resolve reference sources")?;
    }
    config.stores = StoreConfig::from_flags(
      self.remote_store.as_deref(),
      self.write_store.as_deref(),
      &config.devel,
    )?;
    config.keep_going = self.keep_going;

    config.validate()?;
    Ok(config)
  }

  /// Recipe source for the configured recipe directory, logging its revision.
  pub fn recipe_source(&self, config: &Config) -> DirRecipeSource {
    let source = DirRecipeSource::new(&config.recipe_dir);
    source.revision();
    source
  }
}

/// `<os>_<arch>`, e.g. `linux_x86-64`.
fn host_architecture() -> String {
  format!("{}_{}", std::env::consts::OS, std::env::consts::ARCH.replace('_', "-"))
}

fn default_jobs() -> usize {
  std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
