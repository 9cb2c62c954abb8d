//! Installed payload layout and relocation.
//!
//! Payloads are installed at `<work_dir>/<arch>/<package>/<version>-<revision>`.
//! An artifact taken from a store was installed somewhere else when it was
//! packed, so before use it is relocated:
//!
//! 1. unpack into a scratch directory under `<work_dir>/TMP`
//! 2. rewrite the old install prefix to the new one in text files
//! 3. move the payload to its versioned destination under a fresh revision
//! 4. update the payload metadata
//! 5. repack, so the caller can publish the relocated artifact
//!
//! Binary contents are never touched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::build::artifact::{self, ArtifactError, PayloadMeta};
use crate::consts::SCRATCH_DIR;
use crate::recipe::Spec;
use crate::util::hash::Fingerprint;

use super::types::PackageError;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PackageError + '_ {
  move |source| PackageError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// `<arch>/<package>/<version>-<revision>`, relative to the work directory.
pub fn payload_prefix(arch: &str, spec: &Spec, revision: u32) -> PathBuf {
  Path::new(arch).join(&spec.name).join(spec.version_dir(revision))
}

pub fn install_dir(work_dir: &Path, arch: &str, spec: &Spec, revision: u32) -> PathBuf {
  work_dir.join(payload_prefix(arch, spec, revision))
}

/// Revisions of `spec`'s version currently present in the work directory, ascending.
fn installed_revisions(work_dir: &Path, arch: &str, spec: &Spec) -> Result<Vec<u32>, PackageError> {
  let package_dir = work_dir.join(arch).join(&spec.name);
  let entries = match fs::read_dir(&package_dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(io_err(&package_dir)(e)),
  };

  let prefix = format!("{}-", spec.version);
  let mut revisions = Vec::new();
  for entry in entries {
    let entry = entry.map_err(io_err(&package_dir))?;
    let name = entry.file_name();
    let Some(rev) = name
      .to_str()
      .and_then(|n| n.strip_prefix(&prefix))
      .and_then(|r| r.parse::<u32>().ok())
    else {
      continue;
    };
    revisions.push(rev);
  }
  revisions.sort_unstable();
  Ok(revisions)
}

/// The revision already installed with fingerprint `fp`, if any.
pub fn find_installed(
  work_dir: &Path,
  arch: &str,
  spec: &Spec,
  fp: &Fingerprint,
) -> Result<Option<u32>, PackageError> {
  for rev in installed_revisions(work_dir, arch, spec)? {
    let dir = install_dir(work_dir, arch, spec, rev);
    if let Some(meta) = PayloadMeta::read(&dir)? {
      if meta.fingerprint == *fp {
        return Ok(Some(rev));
      }
    }
  }
  Ok(None)
}

/// Lowest positive revision not yet taken for `spec`'s version.
pub fn next_revision(work_dir: &Path, arch: &str, spec: &Spec) -> Result<u32, PackageError> {
  let taken = installed_revisions(work_dir, arch, spec)?;
  let mut rev = 1;
  for t in taken {
    if t == rev {
      rev += 1;
    } else if t > rev {
      break;
    }
  }
  Ok(rev)
}

/// Result of relocating a store artifact.
#[derive(Debug)]
pub struct Relocated {
  pub install_dir: PathBuf,
  /// The repacked artifact, describing the new location.
  pub artifact: Vec<u8>,
}

/// Relocate a store artifact for `spec` into revision `revision` of the
/// work directory.
pub fn relocate(
  bytes: &[u8],
  spec: &Spec,
  fp: &Fingerprint,
  work_dir: &Path,
  arch: &str,
  revision: u32,
) -> Result<Relocated, PackageError> {
  let scratch_root = work_dir.join(SCRATCH_DIR);
  fs::create_dir_all(&scratch_root).map_err(io_err(&scratch_root))?;
  let scratch = tempfile::Builder::new()
    .prefix(&format!("{}-{}-", spec.name, revision))
    .tempdir_in(&scratch_root)
    .map_err(io_err(&scratch_root))?;

  relocate_in(scratch.path(), bytes, spec, fp, work_dir, arch, revision)
}

fn relocate_in(
  scratch: &Path,
  bytes: &[u8],
  spec: &Spec,
  fp: &Fingerprint,
  work_dir: &Path,
  arch: &str,
  revision: u32,
) -> Result<Relocated, PackageError> {
  let payload = artifact::unpack(bytes, scratch)?;
  let mut meta = PayloadMeta::read(&payload)?.ok_or(ArtifactError::MissingMeta)?;
  if meta.fingerprint != *fp {
    return Err(PackageError::FingerprintMismatch {
      package: spec.name.clone(),
      expected: fp.clone(),
      found: meta.fingerprint,
    });
  }

  let dest = install_dir(work_dir, arch, spec, revision);
  if meta.install_prefix != dest {
    let rewritten = rewrite_prefix(&payload, &meta.install_prefix, &dest)?;
    debug!(
      package = %spec.name,
      from = %meta.install_prefix.display(),
      to = %dest.display(),
      files = rewritten,
      "rewrote install prefix"
    );
  }

  if dest.exists() {
    fs::remove_dir_all(&dest).map_err(io_err(&dest))?;
  }
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent).map_err(io_err(parent))?;
  }
  fs::rename(&payload, &dest).map_err(io_err(&dest))?;

  meta.package = spec.name.clone();
  meta.version = spec.version.clone();
  meta.revision = revision;
  meta.install_prefix = dest.clone();
  let repacked = meta
    .write(&dest)
    .and_then(|()| artifact::pack(&dest, &payload_prefix(arch, spec, revision)));

  match repacked {
    Ok(artifact) => Ok(Relocated {
      install_dir: dest,
      artifact,
    }),
    Err(e) => {
      // a half-relocated payload must not be found as an installation later
      if let Err(cleanup) = fs::remove_dir_all(&dest) {
        debug!(path = %dest.display(), error = %cleanup, "could not remove partial relocation");
      }
      Err(e.into())
    }
  }
}

/// Replace `from` with `to` in every UTF-8 regular file below `root`.
///
/// Returns how many files changed. Binary files and symlinks are left alone.
pub fn rewrite_prefix(root: &Path, from: &Path, to: &Path) -> Result<usize, PackageError> {
  let from = from.display().to_string();
  let to = to.display().to_string();
  if from.is_empty() {
    return Ok(0);
  }

  let mut changed = 0;
  for entry in WalkDir::new(root).follow_links(false) {
    let entry = entry.map_err(|e| PackageError::Io {
      path: root.to_path_buf(),
      source: e.into(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let path = entry.path();
    let data = fs::read(path).map_err(io_err(path))?;
    let Ok(text) = String::from_utf8(data) else {
      continue;
    };
    if !text.contains(&from) {
      continue;
    }
    fs::write(path, text.replace(&from, &to)).map_err(io_err(path))?;
    changed += 1;
  }
  Ok(changed)
}
