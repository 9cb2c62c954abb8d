//! Producing package payloads.
//!
//! # Submodules
//!
//! - [`executor`] - running recipes (`BuildExecutor`, shell/container implementation)
//! - [`artifact`] - packing payloads into store artifacts and reading them back

pub mod artifact;
pub mod executor;

pub use artifact::{ArtifactError, PayloadMeta, pack, unpack};
pub use executor::{BuildExecutor, BuildJob, ExecutorError, ShellExecutor, root_variable};
