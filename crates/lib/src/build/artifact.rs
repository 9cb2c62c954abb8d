//! Artifact packing and payload metadata.
//!
//! An artifact is a gzip-compressed tar holding one installed payload under
//! `<arch>/<package>/<version>-<revision>/`. The payload root carries a
//! [`PayloadMeta`] file recording what was built and where it was installed,
//! which is what relocation rewrites against.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tar::Archive;
use thiserror::Error;

use crate::consts::PAYLOAD_META_FILE;
use crate::util::hash::Fingerprint;

#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid payload metadata in {path}: {message}")]
  Meta { path: PathBuf, message: String },

  #[error("artifact has no payload metadata")]
  MissingMeta,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArtifactError + '_ {
  move |source| ArtifactError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// What an installed payload is, and where it was installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMeta {
  pub package: String,
  pub version: String,
  pub revision: u32,
  pub fingerprint: Fingerprint,
  /// Absolute directory the payload was installed to when the file was written.
  pub install_prefix: PathBuf,
}

impl PayloadMeta {
  /// Read the metadata of the payload rooted at `dir`, if there is any.
  pub fn read(dir: &Path) -> Result<Option<Self>, ArtifactError> {
    let path = dir.join(PAYLOAD_META_FILE);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(io_err(&path)(e)),
    };
    serde_json::from_str(&content)
      .map(Some)
      .map_err(|e| ArtifactError::Meta {
        path,
        message: e.to_string(),
      })
  }

  pub fn write(&self, dir: &Path) -> Result<(), ArtifactError> {
    let path = dir.join(PAYLOAD_META_FILE);
    let content = serde_json::to_string_pretty(self).map_err(|e| ArtifactError::Meta {
      path: path.clone(),
      message: e.to_string(),
    })?;
    fs::write(&path, format!("{}\n", content)).map_err(io_err(&path))
  }
}

/// Pack the payload at `payload_dir` into a `.tar.gz`, stored under `prefix`
/// inside the archive. Symlinks are archived as links.
pub fn pack(payload_dir: &Path, prefix: &Path) -> Result<Vec<u8>, ArtifactError> {
  let encoder = GzEncoder::new(Vec::new(), Compression::default());
  let mut builder = tar::Builder::new(encoder);
  builder.follow_symlinks(false);
  builder
    .append_dir_all(prefix, payload_dir)
    .map_err(io_err(payload_dir))?;

  let mut encoder = builder.into_inner().map_err(io_err(payload_dir))?;
  encoder.flush().map_err(io_err(payload_dir))?;
  encoder.finish().map_err(io_err(payload_dir))
}

/// Unpack an artifact into `dest` and return the payload root: the
/// directory holding the payload metadata.
pub fn unpack(bytes: &[u8], dest: &Path) -> Result<PathBuf, ArtifactError> {
  fs::create_dir_all(dest).map_err(io_err(dest))?;
  let mut archive = Archive::new(GzDecoder::new(bytes));
  archive.set_preserve_permissions(true);
  archive.unpack(dest).map_err(io_err(dest))?;

  find_payload_root(dest)?.ok_or(ArtifactError::MissingMeta)
}

/// Locate the payload root below `dir`: `<arch>/<package>/<version>-<revision>`.
fn find_payload_root(dir: &Path) -> Result<Option<PathBuf>, ArtifactError> {
  for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(4).sort_by_file_name() {
    let entry = entry.map_err(|e| ArtifactError::Io {
      path: dir.to_path_buf(),
      source: e.into(),
    })?;
    if entry.file_type().is_file() && entry.file_name() == PAYLOAD_META_FILE {
      return Ok(entry.path().parent().map(Path::to_path_buf));
    }
  }
  Ok(None)
}
