//! Implementation of the `aligot plan` command.
//!
//! Resolves, orders and fingerprints the requested packages and prints the
//! result without building anything.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use aligot_lib::plan::{Plan, TagCommitResolver};

use super::BuildArgs;
use crate::output::{OutputFormat, plan_line, print_field, print_heading, print_json};

#[derive(Debug, Serialize)]
struct PlannedPackage {
  name: String,
  version: String,
  commit: Option<String>,
  fingerprint: Option<String>,
  store_path: Option<PathBuf>,
  requires: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
  arch: String,
  main_package: Option<String>,
  packages: Vec<PlannedPackage>,
}

pub fn cmd_plan(args: &BuildArgs, format: OutputFormat) -> Result<()> {
  let config = args.config()?;
  let source = args.recipe_source(&config);
  let plan = Plan::prepare(&config, source, &TagCommitResolver, &args.packages).context("Failed to plan build")?;

  if format.is_json() {
    let packages = plan
      .ordered_specs()
      .map(|spec| PlannedPackage {
        name: spec.name.clone(),
        version: spec.version.clone(),
        commit: spec.commit_hash.clone(),
        fingerprint: spec.fingerprint.as_ref().map(|fp| fp.to_string()),
        store_path: spec.store_path.clone(),
        requires: spec.requires.clone(),
      })
      .collect();
    return print_json(&PlanOutput {
      arch: config.arch.clone(),
      main_package: plan.main_package().map(str::to_string),
      packages,
    });
  }

  if plan.is_empty() {
    print_heading("Nothing to build");
    return Ok(());
  }

  print_heading(&format!("Build order for {} ({}):", args.packages.join(", "), config.arch));
  for spec in plan.ordered_specs() {
    println!("  {}", plan_line(spec));
  }
  println!();
  print_field("Packages", &plan.order.len().to_string());
  if let Some(main) = plan.main_package() {
    print_field("Main package", main);
  }

  Ok(())
}
