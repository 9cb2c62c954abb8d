//! Build driver.
//!
//! Takes a [`Plan`] and brings every package in it to `Done`:
//! - packages whose dependencies are all done enter a ready set
//! - ready packages are handed to workers, at most `jobs` running at once
//! - a worker reuses an installation or store artifact, or runs the recipe
//! - after each attempt the package's fingerprint is recomputed; if it moved
//!   the package is queued again, up to `max_attempts` times
//!
//! Build failures are not retried. Dependents of a failed package are
//! skipped; without `keep_going` every other package is cancelled as well.

pub mod dag;
pub mod relocate;
pub mod types;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

use crate::build::artifact::{self, PayloadMeta};
use crate::build::{BuildExecutor, BuildJob};
use crate::config::Config;
use crate::consts::BUILD_DIR;
use crate::plan::{CommitResolver, Plan, PlanError, pin_commit};
use crate::recipe::Spec;
use crate::store::{Stores, address};
use crate::util::hash::{Fingerprint, fingerprint};

pub use dag::{BuildGraph, GraphError, topological_order};
pub use types::{
  BuildReport, DriverError, FailedPackage, PackageError, PackageRecord, PackageStatus, SkippedPackage,
};

/// Shared, read-only state handed to every worker.
struct Context {
  config: Config,
  stores: Stores,
  executor: Arc<dyn BuildExecutor>,
  resolver: Arc<dyn CommitResolver>,
  semaphore: Semaphore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallKind {
  Reused,
  Built,
}

#[derive(Debug)]
struct Installed {
  kind: InstallKind,
  install_root: PathBuf,
  warnings: Vec<String>,
}

/// What a worker sends back: the package's spec as it leaves the worker,
/// the outcome, and a new commit and fingerprint if its inputs moved.
struct WorkerResult {
  spec: Spec,
  outcome: Result<Installed, PackageError>,
  drift: Option<(String, Fingerprint)>,
}

/// Build every package in `plan`.
///
/// # Errors
///
/// Only conditions that invalidate the whole build are errors: a package
/// that never converges, or an unusable work directory. Individual package
/// failures are recorded in the returned [`BuildReport`].
pub async fn run(
  plan: &Plan,
  config: &Config,
  stores: Stores,
  executor: Arc<dyn BuildExecutor>,
  resolver: Arc<dyn CommitResolver>,
) -> Result<BuildReport, DriverError> {
  info!(packages = plan.order.len(), jobs = config.jobs, "starting build");

  tokio::fs::create_dir_all(&config.work_dir)
    .await
    .map_err(|source| DriverError::Io {
      path: config.work_dir.clone(),
      source,
    })?;

  let ctx = Arc::new(Context {
    config: config.clone(),
    stores,
    executor,
    resolver,
    semaphore: Semaphore::new(config.jobs.max(1)),
  });

  let graph = &plan.graph;
  let mut specs = plan.specs.clone();
  let mut status: BTreeMap<String, PackageStatus> =
    plan.order.iter().map(|n| (n.clone(), PackageStatus::Pending)).collect();
  let mut attempts: HashMap<String, u32> = HashMap::new();
  let mut waiting: HashMap<String, usize> = plan
    .order
    .iter()
    .map(|n| (n.clone(), graph.dependencies(n).len()))
    .collect();
  let mut ready: BTreeSet<String> = plan
    .order
    .iter()
    .filter(|n| waiting.get(*n) == Some(&0))
    .cloned()
    .collect();

  let mut final_fps: BTreeMap<String, Fingerprint> = BTreeMap::new();
  let mut install_roots: BTreeMap<String, PathBuf> = BTreeMap::new();
  let mut join_set: JoinSet<WorkerResult> = JoinSet::new();
  let mut running: HashMap<Id, String> = HashMap::new();
  let mut report = BuildReport::default();
  let mut halted = false;

  loop {
    if !halted {
      while let Some(name) = ready.pop_first() {
        let Some(mut spec) = specs.get(&name).cloned() else {
          continue;
        };
        spec.revision = None;

        let planned = spec.fingerprint.clone();
        let fp = fingerprint(&spec, &final_fps).map_err(PlanError::from)?;
        if planned.as_ref() != Some(&fp) {
          debug!(package = %name, fingerprint = %fp, "fingerprint refreshed from dependencies");
        }
        let addr = address(&config.arch, &spec.name, &fp);
        spec.fingerprint = Some(fp);
        spec.store_path = Some(addr.store_path);
        spec.alias_path = Some(addr.alias_path);

        let attempt = attempts.entry(name.clone()).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;

        let dep_roots: BTreeMap<String, PathBuf> = spec
          .requires
          .iter()
          .filter_map(|d| install_roots.get(d).map(|r| (d.clone(), r.clone())))
          .collect();
        let dep_fps: BTreeMap<String, Fingerprint> = spec
          .requires
          .iter()
          .filter_map(|d| final_fps.get(d).map(|fp| (d.clone(), fp.clone())))
          .collect();

        debug!(package = %name, attempt, "dispatching");
        status.insert(name.clone(), PackageStatus::Checked);
        let ctx = ctx.clone();
        let handle = join_set.spawn(async move { work(ctx, spec, dep_roots, dep_fps).await });
        running.insert(handle.id(), name);
      }
    }

    let Some(joined) = join_set.join_next_with_id().await else {
      break;
    };
    let result = match joined {
      Ok((id, result)) => {
        running.remove(&id);
        result
      }
      Err(e) if e.is_cancelled() => {
        running.remove(&e.id());
        continue;
      }
      Err(e) => {
        let Some(name) = running.remove(&e.id()) else {
          error!(error = %e, "unknown build worker panicked, stopping");
          halted = true;
          join_set.abort_all();
          continue;
        };
        error!(package = %name, error = %e, "build worker panicked");
        fail(&name, format!("build worker panicked: {}", e), graph, &mut status, &mut report);
        if !config.keep_going {
          halted = true;
          join_set.abort_all();
        }
        continue;
      }
    };

    let WorkerResult { mut spec, outcome, drift } = result;
    let name = spec.name.clone();
    let attempt = attempts.get(&name).copied().unwrap_or(1);

    let installed = match outcome {
      Ok(installed) => installed,
      Err(e) => {
        error!(package = %name, error = %e, "build failed");
        fail(&name, e.to_string(), graph, &mut status, &mut report);
        if !config.keep_going {
          halted = true;
          join_set.abort_all();
        }
        specs.insert(name, spec);
        continue;
      }
    };
    report.warnings.extend(installed.warnings);

    if let Some((commit, new_fp)) = drift {
      if attempt >= config.max_attempts {
        error!(package = %name, attempts = attempt, "package does not converge");
        join_set.abort_all();
        return Err(DriverError::NonConvergent {
          package: name,
          attempts: attempt,
        });
      }
      info!(
        package = %name,
        attempt,
        fingerprint = %new_fp,
        "inputs changed during build, queueing again"
      );
      spec.commit_hash = Some(commit);
      status.insert(name.clone(), PackageStatus::Pending);
      specs.insert(name.clone(), spec);
      ready.insert(name);
      continue;
    }

    let (Some(fp), Some(revision)) = (spec.fingerprint.clone(), spec.revision) else {
      continue;
    };
    let record = PackageRecord {
      name: name.clone(),
      version: spec.version.clone(),
      revision,
      fingerprint: fp.clone(),
      install_root: installed.install_root.clone(),
      attempts: attempt,
    };
    match installed.kind {
      InstallKind::Reused => {
        status.insert(name.clone(), PackageStatus::Reused);
        report.reused.push(record);
      }
      InstallKind::Built => {
        status.insert(name.clone(), PackageStatus::Built);
        report.built.push(record);
      }
    }
    status.insert(name.clone(), PackageStatus::Done);
    debug!(package = %name, revision, "package done");

    final_fps.insert(name.clone(), fp);
    install_roots.insert(name.clone(), installed.install_root);
    specs.insert(name.clone(), spec);

    for dependent in graph.dependents(&name) {
      if let Some(count) = waiting.get_mut(&dependent) {
        *count = count.saturating_sub(1);
        if *count == 0 && status.get(&dependent) == Some(&PackageStatus::Pending) {
          ready.insert(dependent);
        }
      }
    }
  }

  for (name, state) in status.iter_mut() {
    if !state.is_terminal() {
      *state = PackageStatus::Cancelled;
      report.cancelled.push(name.clone());
    }
  }
  report.statuses = status;

  info!(
    built = report.built.len(),
    reused = report.reused.len(),
    failed = report.failed.len(),
    skipped = report.skipped.len(),
    cancelled = report.cancelled.len(),
    "build finished"
  );
  Ok(report)
}

/// One attempt at one package.
async fn work(
  ctx: Arc<Context>,
  mut spec: Spec,
  dep_roots: BTreeMap<String, PathBuf>,
  dep_fps: BTreeMap<String, Fingerprint>,
) -> WorkerResult {
  let _permit = match ctx.semaphore.acquire().await {
    Ok(permit) => permit,
    Err(e) => {
      let outcome = Err(PackageError::Worker {
        package: spec.name.clone(),
        message: e.to_string(),
      });
      return WorkerResult {
        spec,
        outcome,
        drift: None,
      };
    }
  };

  let outcome = install(&ctx, &mut spec, &dep_roots).await;
  let drift = match &outcome {
    Ok(_) => match recheck(&ctx, &spec, &dep_fps) {
      Ok(drift) => drift,
      Err(e) => {
        return WorkerResult {
          spec,
          outcome: Err(e),
          drift: None,
        };
      }
    },
    Err(_) => None,
  };

  WorkerResult { spec, outcome, drift }
}

/// Resolve the commit again and recompute the fingerprint the attempt used.
fn recheck(
  ctx: &Context,
  spec: &Spec,
  dep_fps: &BTreeMap<String, Fingerprint>,
) -> Result<Option<(String, Fingerprint)>, PackageError> {
  let mut probe = spec.clone();
  let commit = pin_commit(&probe, ctx.resolver.as_ref())?;
  probe.commit_hash = Some(commit.clone());
  let fp = fingerprint(&probe, dep_fps)?;

  if spec.fingerprint.as_ref() == Some(&fp) {
    Ok(None)
  } else {
    Ok(Some((commit, fp)))
  }
}

/// Mark `name` failed and every pending package depending on it skipped.
fn fail(
  name: &str,
  error: String,
  graph: &BuildGraph,
  status: &mut BTreeMap<String, PackageStatus>,
  report: &mut BuildReport,
) {
  status.insert(name.to_string(), PackageStatus::Failed);
  report.failed.push(FailedPackage {
    name: name.to_string(),
    error,
  });

  for dependent in graph.transitive_dependents(name) {
    if status.get(&dependent) == Some(&PackageStatus::Pending) {
      warn!(package = %dependent, failed_dependency = %name, "skipping package");
      status.insert(dependent.clone(), PackageStatus::Skipped);
      report.skipped.push(SkippedPackage {
        name: dependent,
        failed_dependency: name.to_string(),
      });
    }
  }
}

/// Make `spec` available in the work directory, by reuse or by building.
async fn install(
  ctx: &Context,
  spec: &mut Spec,
  dep_roots: &BTreeMap<String, PathBuf>,
) -> Result<Installed, PackageError> {
  let config = &ctx.config;
  let arch = config.arch.as_str();
  let fp = spec.fingerprint.clone().ok_or_else(|| PackageError::Worker {
    package: spec.name.clone(),
    message: "package has no fingerprint".to_string(),
  })?;

  if let Some(rev) = relocate::find_installed(&config.work_dir, arch, spec, &fp)? {
    spec.revision = Some(rev);
    info!(package = %spec.name, revision = rev, "already installed");
    return Ok(Installed {
      kind: InstallKind::Reused,
      install_root: relocate::install_dir(&config.work_dir, arch, spec, rev),
      warnings: Vec::new(),
    });
  }

  let revision = relocate::next_revision(&config.work_dir, arch, spec)?;
  spec.revision = Some(revision);

  let addr = address(arch, &spec.name, &fp);
  let artifact_name = spec.artifact_name(arch);

  let relocated = match ctx.stores.find(&addr.artifact(&artifact_name)).await {
    Some(found) => {
      info!(package = %spec.name, fingerprint = %fp, revision, "reusing artifact");
      let spec = spec.clone();
      let fp = fp.clone();
      let work_dir = config.work_dir.clone();
      let arch = arch.to_string();
      let package = spec.name.clone();
      match blocking(&package, move || relocate::relocate(&found, &spec, &fp, &work_dir, &arch, revision)).await {
        Ok(relocated) => Some(relocated),
        Err(e) => {
          warn!(package = %package, error = %e, "store artifact unusable, building instead");
          None
        }
      }
    }
    None => None,
  };

  let (kind, install_root, bytes) = match relocated {
    Some(relocated) => (InstallKind::Reused, relocated.install_dir, relocated.artifact),
    None => {
      info!(package = %spec.name, fingerprint = %fp, revision, "building");
      let install_root = build(ctx, spec, &fp, revision, dep_roots).await?;
      let meta = PayloadMeta {
        package: spec.name.clone(),
        version: spec.version.clone(),
        revision,
        fingerprint: fp.clone(),
        install_prefix: install_root.clone(),
      };
      let root = install_root.clone();
      let prefix = relocate::payload_prefix(arch, spec, revision);
      let bytes = blocking(&spec.name, move || {
        meta.write(&root)?;
        Ok(artifact::pack(&root, &prefix)?)
      })
      .await?;
      (InstallKind::Built, install_root, bytes)
    }
  };

  let published = ctx.stores.publish(&addr, &artifact_name, &bytes).await;
  let warnings = published
    .errors
    .iter()
    .map(|e| {
      warn!(package = %spec.name, error = %e, "artifact not published");
      format!("{}: {}", spec.name, e)
    })
    .collect();

  Ok(Installed {
    kind,
    install_root,
    warnings,
  })
}

/// Run the package's recipe into a fresh install root.
async fn build(
  ctx: &Context,
  spec: &Spec,
  fp: &Fingerprint,
  revision: u32,
  dep_roots: &BTreeMap<String, PathBuf>,
) -> Result<PathBuf, PackageError> {
  let config = &ctx.config;
  let install_root = relocate::install_dir(&config.work_dir, &config.arch, spec, revision);
  let job = BuildJob {
    spec: spec.clone(),
    arch: config.arch.clone(),
    work_dir: config.work_dir.clone(),
    build_dir: config.work_dir.join(BUILD_DIR).join(fp.as_str()).join(&spec.name),
    install_root: install_root.clone(),
    revision,
    dependency_roots: dep_roots.clone(),
    jobs: config.jobs,
    env: config.env.clone(),
    docker: config.docker.clone(),
    volumes: config.volumes.clone(),
    reference_sources: config.reference_sources.clone(),
  };

  if let Err(e) = ctx.executor.build(&job).await {
    if let Err(cleanup) = tokio::fs::remove_dir_all(&install_root).await {
      debug!(path = %install_root.display(), error = %cleanup, "no partial install to remove");
    }
    return Err(e.into());
  }
  Ok(install_root)
}

/// Run filesystem-heavy work off the async workers.
async fn blocking<T, F>(package: &str, f: F) -> Result<T, PackageError>
where
  T: Send + 'static,
  F: FnOnce() -> Result<T, PackageError> + Send + 'static,
{
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|e| PackageError::Worker {
      package: package.to_string(),
      message: e.to_string(),
    })?
}
