//! Artifact stores.
//!
//! Three roles exist for a build:
//! - the local store under `<work_dir>/TARS`, always consulted and written
//! - an optional remote store, only read from for reuse
//! - an optional write store, receiving every freshly produced artifact
//!
//! # Submodules
//!
//! - [`paths`] - fingerprint to path addressing
//! - [`transport`] - store access (local filesystem)

pub mod paths;
pub mod transport;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Config;

pub use paths::{StoreAddress, address};
pub use transport::{LocalStore, StoreError, StoreTransport};

/// The stores taking part in a build, by role.
#[derive(Debug, Clone)]
pub struct Stores {
  pub local: Arc<dyn StoreTransport>,
  pub remote: Option<Arc<dyn StoreTransport>>,
  pub write: Option<Arc<dyn StoreTransport>>,
}

/// Outcome of publishing one artifact to every writable store.
#[derive(Debug, Default)]
pub struct PublishOutcome {
  pub errors: Vec<StoreError>,
}

impl Stores {
  /// Local-filesystem stores for each role configured in `config`.
  pub fn from_config(config: &Config) -> Self {
    let remote = config
      .stores
      .remote
      .as_ref()
      .map(|p| Arc::new(LocalStore::new(p)) as Arc<dyn StoreTransport>);
    let write = config
      .stores
      .write
      .as_ref()
      .map(|p| Arc::new(LocalStore::new(p)) as Arc<dyn StoreTransport>);

    Self {
      local: Arc::new(LocalStore::new(config.local_store_root())),
      remote,
      write,
    }
  }

  /// Look for an artifact, local store first, then the remote store.
  ///
  /// Store errors are logged and treated as "not available".
  pub async fn find(&self, path: &Path) -> Option<Vec<u8>> {
    let candidates = std::iter::once(&self.local).chain(self.remote.as_ref());
    for store in candidates {
      match store.exists(path).await {
        Ok(true) => match store.fetch(path).await {
          Ok(bytes) => {
            debug!(store = %store.describe(), path = %path.display(), "artifact found");
            return Some(bytes);
          }
          Err(e) => warn!(error = %e, "could not fetch artifact, ignoring this store"),
        },
        Ok(false) => {}
        Err(e) => warn!(error = %e, "could not query store, ignoring it"),
      }
    }
    None
  }

  /// Publish an artifact to the local store and, if configured, the write
  /// store, then repoint the package alias in each.
  ///
  /// Failures are collected rather than returned: an unpublished artifact is
  /// still usable locally.
  pub async fn publish(&self, address: &StoreAddress, artifact_name: &str, bytes: &[u8]) -> PublishOutcome {
    let mut outcome = PublishOutcome::default();
    let artifact = address.artifact(artifact_name);
    let target = address.alias_target();

    let targets = std::iter::once(&self.local).chain(self.write.as_ref());
    for store in targets {
      let result = async {
        store.publish(&artifact, bytes).await?;
        store.link(&address.alias_path, &target).await
      }
      .await;

      if let Err(e) = result {
        warn!(error = %e, "publish failed");
        outcome.errors.push(e);
      }
    }
    outcome
  }
}
