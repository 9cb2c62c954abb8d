//! Store transports.
//!
//! A transport moves artifact bytes to and from one store root. Paths given
//! to a transport are relative to that root (see [`super::paths`]).

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("{store}: failed to read {path}: {message}")]
  Fetch { store: String, path: PathBuf, message: String },

  #[error("{store}: failed to publish {path}: {message}")]
  Publish { store: String, path: PathBuf, message: String },

  #[error("{store}: failed to point {alias} at {target}: {message}")]
  Link {
    store: String,
    alias: PathBuf,
    target: PathBuf,
    message: String,
  },
}

/// Access to a single artifact store.
///
/// Publishing the same path twice must be harmless: paths are derived from
/// fingerprints, so both writers hold identical content.
#[async_trait]
pub trait StoreTransport: Send + Sync + std::fmt::Debug {
  /// Human-readable location, for logs and errors.
  fn describe(&self) -> String;

  async fn exists(&self, path: &Path) -> Result<bool, StoreError>;

  async fn fetch(&self, path: &Path) -> Result<Vec<u8>, StoreError>;

  async fn publish(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError>;

  /// Point `alias` at `target`, where `target` is relative to the alias' directory.
  async fn link(&self, alias: &Path, target: &Path) -> Result<(), StoreError>;
}

/// A store on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
  root: PathBuf,
}

impl LocalStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn resolve(&self, path: &Path) -> PathBuf {
    self.root.join(path)
  }
}

#[async_trait]
impl StoreTransport for LocalStore {
  fn describe(&self) -> String {
    self.root.display().to_string()
  }

  async fn exists(&self, path: &Path) -> Result<bool, StoreError> {
    fs::try_exists(self.resolve(path)).await.map_err(|e| StoreError::Fetch {
      store: self.describe(),
      path: path.to_path_buf(),
      message: e.to_string(),
    })
  }

  async fn fetch(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
    fs::read(self.resolve(path)).await.map_err(|e| StoreError::Fetch {
      store: self.describe(),
      path: path.to_path_buf(),
      message: e.to_string(),
    })
  }

  async fn publish(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dest = self.resolve(path);
    let bytes = bytes.to_vec();
    blocking(move || {
      let parent = parent_dir(&dest)?;
      let mut tmp = tempfile::Builder::new()
        .prefix(".publish-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
      tmp.write_all(&bytes)?;
      tmp.persist(&dest).map_err(|e| e.error)?;
      Ok(())
    })
    .await
    .map_err(|e| StoreError::Publish {
      store: self.describe(),
      path: path.to_path_buf(),
      message: e.to_string(),
    })
  }

  async fn link(&self, alias: &Path, target: &Path) -> Result<(), StoreError> {
    let dest = self.resolve(alias);
    let link_target = target.to_path_buf();
    blocking(move || {
      let parent = parent_dir(&dest)?;
      let tmp = tempfile::Builder::new()
        .prefix(".alias-")
        .suffix(".tmp")
        .make_in(parent, |path| symlink_dir(&link_target, path))?;
      tmp.persist(&dest).map_err(|e| e.error)?;
      Ok(())
    })
    .await
    .map_err(|e| StoreError::Link {
      store: self.describe(),
      alias: alias.to_path_buf(),
      target: target.to_path_buf(),
      message: e.to_string(),
    })
  }
}

/// Create and return the directory `path` will be written into.
fn parent_dir(path: &Path) -> io::Result<&Path> {
  let parent = path
    .parent()
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "store path has no parent"))?;
  std::fs::create_dir_all(parent)?;
  Ok(parent)
}

async fn blocking<F>(f: F) -> io::Result<()>
where
  F: FnOnce() -> io::Result<()> + Send + 'static,
{
  tokio::task::spawn_blocking(f).await.map_err(io::Error::other)?
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_dir(target, link)
}
