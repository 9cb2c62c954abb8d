//! aligot-lib: dependency resolution, fingerprinting and build convergence
//! for trees of interdependent native packages.
//!
//! The pipeline runs in this order:
//! - [`recipe`]: load recipes and resolve the requirement closure into `Spec`s
//! - [`execute::dag`]: order the closure dependencies-first
//! - [`plan`]: pin commits, compute fingerprints and store addresses
//! - [`execute`]: drive builds (or store reuse) to a fixed point

pub mod build;
pub mod config;
pub mod consts;
pub mod execute;
pub mod plan;
pub mod recipe;
pub mod store;
pub mod util;
