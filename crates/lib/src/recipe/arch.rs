//! Architecture-conditional requirements.
//!
//! A requirement token is either `name`, which always applies, or
//! `name:pattern`, which applies when the regular expression `pattern`
//! matches somewhere in the target architecture string.

use regex::Regex;

use super::RecipeError;

/// A requirement token split into its name and optional architecture pattern.
#[derive(Debug, Clone)]
pub struct Requirement {
  pub name: String,
  pub pattern: Option<Regex>,
}

impl Requirement {
  /// Parse a `name` or `name:pattern` token.
  pub fn parse(token: &str) -> Result<Self, RecipeError> {
    let (name, pattern) = match token.split_once(':') {
      Some((name, pattern)) => (name.trim(), Some(pattern)),
      None => (token.trim(), None),
    };

    if name.is_empty() {
      return Err(RecipeError::InvalidRequirement {
        requirement: token.to_string(),
        message: "empty package name".to_string(),
      });
    }

    let pattern = pattern
      .map(|p| {
        Regex::new(p).map_err(|e| RecipeError::InvalidRequirement {
          requirement: token.to_string(),
          message: e.to_string(),
        })
      })
      .transpose()?;

    Ok(Self {
      name: name.to_string(),
      pattern,
    })
  }

  pub fn matches(&self, arch: &str) -> bool {
    self.pattern.as_ref().is_none_or(|re| re.is_match(arch))
  }
}

/// Keep the names of the requirements that apply to `arch`.
///
/// Fails on the first token whose pattern is not a valid regular expression,
/// whether or not it would have matched.
pub fn filter_by_arch(arch: &str, tokens: &[String]) -> Result<Vec<String>, RecipeError> {
  let mut names = Vec::with_capacity(tokens.len());
  for token in tokens {
    let requirement = Requirement::parse(token)?;
    if requirement.matches(arch) {
      names.push(requirement.name);
    }
  }
  Ok(names)
}
