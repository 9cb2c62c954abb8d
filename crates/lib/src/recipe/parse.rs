//! Recipe document parsing.
//!
//! A recipe is a YAML header, a line holding only `---`, then the build
//! script body:
//!
//! ```text
//! package: zlib
//! version: v1.2.13
//! requires:
//!   - "GCC-Toolchain:(slc|ubuntu).*"
//! ---
//! ./configure --prefix="$INSTALLROOT"
//! make -j"$JOBS" install
//! ```

use crate::consts::RECIPE_DELIMITER;

use super::RecipeError;
use super::types::RecipeHeader;

/// Split a recipe document at the first delimiter line.
///
/// Returns `(header, body)`. Later `---` lines belong to the body.
pub fn split_recipe<'a>(name: &str, content: &'a str) -> Result<(&'a str, &'a str), RecipeError> {
  let mut offset = 0;
  for line in content.split_inclusive('\n') {
    if line.trim_end_matches(['\n', '\r']) == RECIPE_DELIMITER {
      let header = &content[..offset];
      let body = &content[offset + line.len()..];
      return Ok((header, body));
    }
    offset += line.len();
  }

  Err(RecipeError::Malformed {
    name: name.to_string(),
    message: format!("missing '{}' line between header and recipe", RECIPE_DELIMITER),
  })
}

/// Parse the YAML header of a recipe.
pub fn parse_header(name: &str, header: &str) -> Result<RecipeHeader, RecipeError> {
  let parsed: RecipeHeader = serde_yaml::from_str(header).map_err(|e| RecipeError::Malformed {
    name: name.to_string(),
    message: e.to_string(),
  })?;

  if parsed.package.trim().is_empty() {
    return Err(RecipeError::Malformed {
      name: name.to_string(),
      message: "empty 'package' field".to_string(),
    });
  }

  Ok(parsed)
}

/// Parse a whole recipe document into its header and body text.
pub fn parse_recipe(name: &str, content: &str) -> Result<(RecipeHeader, String), RecipeError> {
  let (header, body) = split_recipe(name, content)?;
  let header = parse_header(name, header)?;
  Ok((header, body.to_string()))
}
