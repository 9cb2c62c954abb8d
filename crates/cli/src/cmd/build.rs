//! Implementation of the `aligot build` command.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::info;

use aligot_lib::build::ShellExecutor;
use aligot_lib::execute::run;
use aligot_lib::plan::{Plan, TagCommitResolver};
use aligot_lib::store::Stores;

use super::BuildArgs;
use crate::output::{OutputFormat, elapsed, print_field, print_json, print_report};

/// Build the requested packages.
///
/// Fails if any package could not be installed, after reporting every
/// package's outcome.
pub fn cmd_build(args: &BuildArgs, format: OutputFormat) -> Result<()> {
  let config = args.config()?;
  let source = args.recipe_source(&config);
  let plan = Plan::prepare(&config, source, &TagCommitResolver, &args.packages).context("Failed to plan build")?;

  if let Some(main) = plan.main_package() {
    info!(package = %main, work_dir = %config.work_dir.display(), "building");
  }

  let stores = Stores::from_config(&config);
  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(run(
      &plan,
      &config,
      stores,
      Arc::new(ShellExecutor::new()),
      Arc::new(TagCommitResolver),
    ))
    .context("Build aborted")?;

  if format.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report);
    println!();
    print_field("Elapsed", &elapsed(started.elapsed()));
  }

  if !report.is_success() {
    bail!(
      "{} package(s) failed, {} skipped, {} cancelled",
      report.failed.len(),
      report.skipped.len(),
      report.cancelled.len()
    );
  }
  Ok(())
}
