//! Test fixtures and doubles for aligot-lib.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::build::{BuildExecutor, BuildJob, ExecutorError};
use crate::plan::{CommitError, CommitResolver};
use crate::recipe::{RecipeHeader, Spec};

/// A spec named `name` at version `v1`, depending at runtime on `deps`.
pub fn spec(name: &str, deps: &[&str]) -> Spec {
  let header = RecipeHeader {
    package: name.to_string(),
    version: Some("v1".to_string()),
    ..Default::default()
  };
  let mut spec = Spec::from_header(header, "make install\n".to_string());
  let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
  spec.requires = deps.clone();
  spec.runtime_requires = deps;
  spec
}

pub fn specs(list: Vec<Spec>) -> BTreeMap<String, Spec> {
  list.into_iter().map(|s| (s.name.clone(), s)).collect()
}

/// A recipe document for `name` requiring `requires`, with `body` as script.
pub fn recipe_doc(name: &str, requires: &[&str], body: &str) -> String {
  let mut doc = format!("package: {}\nversion: v1\n", name);
  if !requires.is_empty() {
    doc.push_str("requires:\n");
    for r in requires {
      doc.push_str(&format!("  - \"{}\"\n", r));
    }
  }
  doc.push_str("---\n");
  doc.push_str(body);
  doc
}

/// Executor that records every build and writes a small payload.
///
/// The payload file `<name>.txt` contains the install root, so relocation
/// can be observed.
#[derive(Debug, Default)]
pub struct CountingExecutor {
  calls: Mutex<Vec<String>>,
  fail: BTreeSet<String>,
  panic: BTreeSet<String>,
  delay: Duration,
  active: AtomicUsize,
  peak: AtomicUsize,
}

impl CountingExecutor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing(names: &[&str]) -> Self {
    Self {
      fail: names.iter().map(|n| n.to_string()).collect(),
      ..Default::default()
    }
  }

  /// Panics instead of returning for the given packages.
  pub fn panicking(names: &[&str]) -> Self {
    Self {
      panic: names.iter().map(|n| n.to_string()).collect(),
      ..Default::default()
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn count(&self, name: &str) -> usize {
    self.calls().iter().filter(|c| *c == name).count()
  }

  /// Highest number of builds observed running at once.
  pub fn peak(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl BuildExecutor for CountingExecutor {
  async fn build(&self, job: &BuildJob) -> Result<(), ExecutorError> {
    let name = job.spec.name.clone();
    self.calls.lock().unwrap().push(name.clone());

    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    self.active.fetch_sub(1, Ordering::SeqCst);

    if self.panic.contains(&name) {
      panic!("recipe runner for {} crashed", name);
    }
    if self.fail.contains(&name) {
      return Err(ExecutorError::Failed {
        package: name,
        code: Some(1),
      });
    }

    std::fs::create_dir_all(&job.install_root).unwrap();
    std::fs::write(
      job.install_root.join(format!("{}.txt", name)),
      job.install_root.display().to_string(),
    )
    .unwrap();
    Ok(())
  }
}

/// Resolver whose answer changes on every call, so fingerprints never settle.
#[derive(Debug, Default)]
pub struct DriftingResolver {
  calls: AtomicU64,
}

impl DriftingResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn calls(&self) -> u64 {
    self.calls.load(Ordering::SeqCst)
  }
}

impl CommitResolver for DriftingResolver {
  fn resolve(&self, _source: &str, tag: &str) -> Result<String, CommitError> {
    let n = self.calls.fetch_add(1, Ordering::SeqCst);
    Ok(format!("{}-{}", tag, n))
  }
}
