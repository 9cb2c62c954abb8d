//! Requirement closure resolution.
//!
//! Starting from the requested packages, recipes are loaded breadth-first
//! until every requirement resolves to exactly one [`Spec`]. While loading:
//!
//! 1. requirement tokens are filtered by target architecture
//! 2. the implicit `defaults-<profile>` build requirement is appended
//! 3. disabled packages are stripped from every requirement list
//! 4. `requires` becomes `runtime_requires` followed by `build_requires`

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::config::Config;

use super::RecipeError;
use super::arch::filter_by_arch;
use super::parse::parse_recipe;
use super::source::RecipeSource;
use super::types::Spec;

/// The resolved requirement closure of a set of root packages.
#[derive(Debug, Clone, Default)]
pub struct Closure {
  /// Every package in the closure, keyed by its canonical name.
  pub specs: BTreeMap<String, Spec>,
  /// The requested packages that were not disabled, by canonical name.
  pub roots: Vec<String>,
}

/// Loads recipes on demand and resolves requirement closures.
pub struct Registry<'a, S: RecipeSource> {
  config: &'a Config,
  source: S,
}

impl<'a, S: RecipeSource> Registry<'a, S> {
  pub fn new(config: &'a Config, source: S) -> Self {
    Self { config, source }
  }

  /// Resolve the full closure of `roots`.
  ///
  /// # Errors
  ///
  /// Any missing or malformed recipe, or invalid requirement pattern, fails
  /// the whole resolution.
  pub fn resolve(&self, roots: &[String]) -> Result<Closure, RecipeError> {
    let mut specs: BTreeMap<String, Spec> = BTreeMap::new();
    // lower-cased name -> canonical name, for loaded and disabled packages alike
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut pending: VecDeque<String> = roots.iter().cloned().collect();

    while let Some(name) = pending.pop_front() {
      let key = name.to_lowercase();
      if seen.contains_key(&key) {
        continue;
      }
      if self.config.is_disabled(&name) {
        debug!(package = %name, "package disabled");
        seen.insert(key, name);
        continue;
      }

      let spec = self.load(&name)?;
      seen.insert(key, spec.name.clone());
      if self.config.is_disabled(&spec.name) {
        debug!(package = %spec.name, "package disabled");
        continue;
      }

      debug!(package = %spec.name, requires = ?spec.requires, "resolved recipe");
      pending.extend(spec.requires.iter().cloned());
      specs.insert(spec.name.clone(), spec);
    }

    canonicalize(&mut specs, &seen);

    let roots = roots
      .iter()
      .filter_map(|r| seen.get(&r.to_lowercase()))
      .filter(|name| specs.contains_key(*name))
      .cloned()
      .collect();

    Ok(Closure { specs, roots })
  }

  /// Load and prepare a single package's spec.
  fn load(&self, name: &str) -> Result<Spec, RecipeError> {
    let content = self.source.lookup(name)?;
    let (header, body) = parse_recipe(name, &content)?;

    if !header.package.eq_ignore_ascii_case(name) {
      return Err(RecipeError::Malformed {
        name: name.to_string(),
        message: format!("recipe declares package '{}'", header.package),
      });
    }

    let mut spec = Spec::from_header(header, body);
    let arch = &self.config.arch;

    let mut runtime = filter_by_arch(arch, &spec.requires)?;
    let mut build = filter_by_arch(arch, &spec.build_requires)?;

    let defaults = self.config.defaults_package();
    if !spec.name.eq_ignore_ascii_case(&defaults) {
      build.push(defaults);
    }

    runtime.retain(|r| !self.config.is_disabled(r));
    build.retain(|r| !self.config.is_disabled(r));
    dedup(&mut runtime);
    dedup(&mut build);

    let mut requires = runtime.clone();
    requires.extend(build.iter().cloned());
    dedup(&mut requires);

    spec.runtime_requires = runtime;
    spec.build_requires = build;
    spec.requires = requires;
    Ok(spec)
  }
}

/// Rewrite requirement names to the canonical spelling of the loaded recipe
/// and drop anything that did not end up in the closure.
fn canonicalize(specs: &mut BTreeMap<String, Spec>, seen: &HashMap<String, String>) {
  let present: HashSet<String> = specs.keys().cloned().collect();
  let fix = |names: &mut Vec<String>| {
    let mut out: Vec<String> = names
      .iter()
      .filter_map(|n| seen.get(&n.to_lowercase()))
      .filter(|n| present.contains(*n))
      .cloned()
      .collect();
    dedup(&mut out);
    *names = out;
  };

  for spec in specs.values_mut() {
    fix(&mut spec.requires);
    fix(&mut spec.build_requires);
    fix(&mut spec.runtime_requires);
  }
}

/// Remove repeated entries, keeping the first occurrence.
fn dedup(names: &mut Vec<String>) {
  let mut seen = HashSet::new();
  names.retain(|n| seen.insert(n.clone()));
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::recipe::MemoryRecipeSource;

  fn config() -> Config {
    Config::new("alidist", "/sw", "slc7_x86-64")
  }

  fn recipe(name: &str, requires: &[&str], build_requires: &[&str]) -> String {
    let mut doc = format!("package: {}\nversion: v1\n", name);
    if !requires.is_empty() {
      doc.push_str("requires:\n");
      for r in requires {
        doc.push_str(&format!("  - \"{}\"\n", r));
      }
    }
    if !build_requires.is_empty() {
      doc.push_str("build_requires:\n");
      for r in build_requires {
        doc.push_str(&format!("  - \"{}\"\n", r));
      }
    }
    doc.push_str("---\nmake install\n");
    doc
  }

  fn base_source() -> MemoryRecipeSource {
    MemoryRecipeSource::new().with("defaults-release", recipe("defaults-release", &[], &[]))
  }

  fn roots(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn resolves_transitive_closure() {
    let source = base_source()
      .with("A", recipe("A", &[], &[]))
      .with("B", recipe("B", &["A"], &[]))
      .with("C", recipe("C", &["A", "B"], &[]));
    let config = config();

    let closure = Registry::new(&config, source).resolve(&roots(&["C"])).unwrap();

    let names: Vec<_> = closure.specs.keys().cloned().collect();
    assert_eq!(names, vec!["A", "B", "C", "defaults-release"]);
    assert_eq!(closure.roots, vec!["C"]);
  }

  #[test]
  fn disable_matches_any_letter_case() {
    let source = base_source()
      .with("ROOT", recipe("ROOT", &[], &[]))
      .with("A", recipe("A", &["ROOT"], &["ROOT"]));
    let mut config = config();
    config.disable.insert("root".to_string());

    let closure = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap();

    assert!(!closure.specs.contains_key("ROOT"));
    let a = &closure.specs["A"];
    assert_eq!(a.requires, vec!["defaults-release"]);
    assert!(a.runtime_requires.is_empty());
  }

  #[test]
  fn defaults_are_build_requirements_except_for_themselves() {
    let source = base_source().with("A", recipe("A", &[], &[]));
    let config = config();

    let closure = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap();

    let a = &closure.specs["A"];
    assert_eq!(a.build_requires, vec!["defaults-release"]);
    assert!(a.runtime_requires.is_empty());
    assert_eq!(a.requires, vec!["defaults-release"]);
    assert!(closure.specs["defaults-release"].requires.is_empty());
  }

  #[test]
  fn runtime_requires_exclude_build_requires() {
    let source = base_source()
      .with("cmake", recipe("cmake", &[], &[]))
      .with("zlib", recipe("zlib", &[], &[]))
      .with("A", recipe("A", &["zlib"], &["cmake"]));
    let config = config();

    let closure = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap();

    let a = &closure.specs["A"];
    assert_eq!(a.runtime_requires, vec!["zlib"]);
    assert_eq!(a.build_requires, vec!["cmake", "defaults-release"]);
    assert_eq!(a.requires, vec!["zlib", "cmake", "defaults-release"]);
  }

  #[test]
  fn architecture_filter_applies_to_both_lists() {
    let source = base_source()
      .with("linuxonly", recipe("linuxonly", &[], &[]))
      .with("A", recipe("A", &["linuxonly:slc.*", "maconly:osx.*"], &["mactool:osx.*"]));
    let config = config();

    let closure = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap();

    let a = &closure.specs["A"];
    assert_eq!(a.requires, vec!["linuxonly", "defaults-release"]);
    assert!(!closure.specs.contains_key("maconly"));
    assert!(!closure.specs.contains_key("mactool"));
  }

  #[test]
  fn disabled_dependency_is_stripped_everywhere() {
    // D is disabled; both B and C list it but neither may keep a dangling edge.
    let source = base_source()
      .with("D", recipe("D", &[], &[]))
      .with("B", recipe("B", &["D"], &[]))
      .with("C", recipe("C", &["B"], &["D"]))
      .with("A", recipe("A", &["B", "C"], &[]));
    let mut config = config();
    config.disable.insert("D".to_string());

    let closure = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap();

    assert!(!closure.specs.contains_key("D"));
    for spec in closure.specs.values() {
      assert!(!spec.requires.contains(&"D".to_string()), "{} still requires D", spec.name);
      assert!(!spec.build_requires.contains(&"D".to_string()));
      assert!(!spec.runtime_requires.contains(&"D".to_string()));
    }
  }

  #[test]
  fn disabled_defaults_are_not_appended() {
    let source = MemoryRecipeSource::new().with("A", recipe("A", &[], &[]));
    let mut config = config();
    config.disable.insert("defaults-release".to_string());

    let closure = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap();
    assert!(closure.specs["A"].requires.is_empty());
  }

  #[test]
  fn disabled_root_yields_empty_closure() {
    let source = base_source().with("A", recipe("A", &[], &[]));
    let mut config = config();
    config.disable.insert("A".to_string());

    let closure = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap();
    assert!(closure.specs.is_empty());
    assert!(closure.roots.is_empty());
  }

  #[test]
  fn diamond_loads_each_recipe_once() {
    let source = base_source()
      .with("A", recipe("A", &[], &[]))
      .with("B", recipe("B", &["A"], &[]))
      .with("C", recipe("C", &["A"], &[]))
      .with("D", recipe("D", &["B", "C", "A", "A"], &[]));
    let config = config();

    let closure = Registry::new(&config, source).resolve(&roots(&["D"])).unwrap();
    assert_eq!(closure.specs.len(), 5);
    assert_eq!(closure.specs["D"].requires, vec!["B", "C", "A", "defaults-release"]);
  }

  #[test]
  fn requirement_case_is_canonicalized() {
    let source = base_source()
      .with("ROOT", recipe("ROOT", &[], &[]))
      .with("A", recipe("A", &["root"], &[]));
    let config = config();

    let closure = Registry::new(&config, source).resolve(&roots(&["a"])).unwrap();
    assert_eq!(closure.specs["A"].requires, vec!["ROOT", "defaults-release"]);
    assert_eq!(closure.roots, vec!["A"]);
  }

  #[test]
  fn missing_dependency_is_fatal() {
    let source = base_source().with("A", recipe("A", &["ghost"], &[]));
    let config = config();

    let err = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap_err();
    assert!(matches!(err, RecipeError::Missing { ref name, .. } if name == "ghost"));
  }

  #[test]
  fn mismatched_package_name_is_malformed() {
    let source = base_source().with("A", recipe("B", &[], &[]));
    let config = config();

    let err = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap_err();
    assert!(matches!(err, RecipeError::Malformed { .. }));
  }

  #[test]
  fn invalid_pattern_is_fatal() {
    let source = base_source().with("A", recipe("A", &["x:(bad"], &[]));
    let config = config();

    let err = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap_err();
    assert!(matches!(err, RecipeError::InvalidRequirement { .. }));
  }

  #[test]
  fn cyclic_recipes_still_terminate() {
    let source = base_source()
      .with("A", recipe("A", &["B"], &[]))
      .with("B", recipe("B", &["A"], &[]));
    let config = config();

    let closure = Registry::new(&config, source).resolve(&roots(&["A"])).unwrap();
    assert_eq!(closure.specs.len(), 3);
  }
}
