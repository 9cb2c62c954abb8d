//! Recipes and the requirement closure.
//!
//! # Submodules
//!
//! - [`arch`] - architecture-conditional requirement filtering
//! - [`parse`] - header/body split and YAML header parsing
//! - [`registry`] - breadth-first resolution of the requirement closure
//! - [`source`] - where recipe documents are read from

pub mod arch;
pub mod parse;
pub mod registry;
pub mod source;
mod types;

use thiserror::Error;

pub use registry::{Closure, Registry};
pub use source::{DirRecipeSource, MemoryRecipeSource, RecipeSource};
pub use types::*;

/// Errors raised while loading recipes. All of them abort before any build starts.
#[derive(Debug, Error)]
pub enum RecipeError {
  /// The recipe source has no document for the package, or it could not be read.
  #[error("missing recipe for {name}: {message}")]
  Missing { name: String, message: String },

  /// The document lacks the delimiter or its header does not parse.
  #[error("malformed recipe for {name}: {message}")]
  Malformed { name: String, message: String },

  /// An architecture pattern is not a valid regular expression.
  #[error("invalid requirement '{requirement}': {message}")]
  InvalidRequirement { requirement: String, message: String },
}
