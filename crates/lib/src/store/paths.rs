//! Store addressing.
//!
//! Paths are relative to a store root; each transport supplies its own root.
//!
//! ```text
//! <root>/
//! └── <arch>/
//!     ├── store/
//!     │   └── <fp[0..2]>/
//!     │       └── <fingerprint>/
//!     │           └── <name>-<version>.<arch>.tar.gz
//!     └── <name> -> store/<fp[0..2]>/<fingerprint>
//! ```

use std::path::{Path, PathBuf};

use crate::util::hash::Fingerprint;

/// Where a package lives in a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreAddress {
  /// `<arch>/store/<shard>/<fingerprint>`
  pub store_path: PathBuf,
  /// `<arch>/<name>`, pointing at the current store entry for the package.
  pub alias_path: PathBuf,
}

impl StoreAddress {
  /// Path of the artifact file inside the store directory.
  pub fn artifact(&self, artifact_name: &str) -> PathBuf {
    self.store_path.join(artifact_name)
  }

  /// Target of the alias symlink, relative to the alias' parent directory.
  pub fn alias_target(&self) -> PathBuf {
    let mut components = self.store_path.components();
    components.next();
    components.as_path().to_path_buf()
  }
}

/// Address a package by name and fingerprint.
pub fn address(arch: &str, name: &str, fingerprint: &Fingerprint) -> StoreAddress {
  StoreAddress {
    store_path: store_dir(arch, fingerprint),
    alias_path: Path::new(arch).join(name),
  }
}

/// Sharded directory of a fingerprint: `<arch>/store/<shard>/<fingerprint>`.
pub fn store_dir(arch: &str, fingerprint: &Fingerprint) -> PathBuf {
  Path::new(arch)
    .join("store")
    .join(fingerprint.shard())
    .join(fingerprint.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fp() -> Fingerprint {
    Fingerprint("ab12cd34".to_string() + &"0".repeat(56))
  }

  #[test]
  fn store_path_is_sharded_by_prefix() {
    let addr = address("slc7_x86-64", "zlib", &fp());
    assert_eq!(
      addr.store_path,
      PathBuf::from("slc7_x86-64").join("store").join("ab").join(fp().as_str())
    );
  }

  #[test]
  fn alias_path_is_per_package() {
    let addr = address("slc7_x86-64", "zlib", &fp());
    assert_eq!(addr.alias_path, PathBuf::from("slc7_x86-64").join("zlib"));
  }

  #[test]
  fn alias_target_is_relative_to_arch_dir() {
    let addr = address("x86_64", "zlib", &fp());
    assert_eq!(addr.alias_target(), PathBuf::from("store").join("ab").join(fp().as_str()));
  }

  #[test]
  fn artifact_lives_inside_store_dir() {
    let addr = address("x86_64", "zlib", &fp());
    assert_eq!(addr.artifact("zlib-v1.x86_64.tar.gz"), addr.store_path.join("zlib-v1.x86_64.tar.gz"));
  }
}
