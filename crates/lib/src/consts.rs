//! Constants shared across the crate.

pub const APP_NAME: &str = "aligot";

/// Line separating a recipe's YAML header from its build script body.
pub const RECIPE_DELIMITER: &str = "---";

/// File extension of recipe files in the recipe directory.
pub const RECIPE_EXTENSION: &str = "sh";

/// Stand-in for absent fingerprint inputs.
pub const HASH_SENTINEL: &str = "none";

/// Commit recorded for packages that declare no source.
pub const NO_SOURCE_COMMIT: &str = "0";

/// Prefix of the implicit per-profile defaults package.
pub const DEFAULTS_PREFIX: &str = "defaults-";

/// Default configuration profile.
pub const DEFAULT_PROFILE: &str = "release";

/// Attempts a single package may take before the build is declared non-convergent.
pub const MAX_BUILD_ATTEMPTS: u32 = 20;

/// Number of leading fingerprint characters used as the store shard directory.
pub const STORE_SHARD_LEN: usize = 2;

/// Directory under the work dir holding the local artifact store.
pub const TARS_DIR: &str = "TARS";

/// Directory under the work dir holding per-package build areas.
pub const BUILD_DIR: &str = "BUILD";

/// Directory under the work dir holding relocation scratch areas.
pub const SCRATCH_DIR: &str = "TMP";

/// Metadata file written at the root of every packaged payload.
pub const PAYLOAD_META_FILE: &str = ".aligot-meta.json";

/// Packages that, when present in a build, are reported as its main package.
pub const MAIN_PACKAGES: &[&str] = &["aliroot", "aliphysics", "o2"];
