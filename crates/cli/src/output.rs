//! Terminal rendering of plans and build reports.
//!
//! Installed packages go to stdout; failures, skips, cancellations and store
//! warnings go to stderr so they survive `aligot build ... > log`.

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use aligot_lib::execute::{BuildReport, PackageRecord};
use aligot_lib::recipe::Spec;
use aligot_lib::util::hash::Fingerprint;

/// Fingerprint characters shown in text output.
const SHORT_HASH: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// How a report line is marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// Built or reused.
  Installed,
  /// The package itself failed.
  Failed,
  /// Skipped, cancelled, or a store warning.
  Notice,
}

impl Outcome {
  fn mark(self) -> &'static str {
    match self {
      Outcome::Installed => "✓",
      Outcome::Failed => "✗",
      Outcome::Notice => "⚠",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
  pub outcome: Outcome,
  pub text: String,
}

impl ReportLine {
  fn new(outcome: Outcome, text: String) -> Self {
    Self { outcome, text }
  }
}

pub fn short_hash(fp: &Fingerprint) -> &str {
  let hex = fp.as_str();
  &hex[..hex.len().min(SHORT_HASH)]
}

fn installed(verb: &str, record: &PackageRecord) -> String {
  format!(
    "{} {} {}-{} ({})",
    verb,
    record.name,
    record.version,
    record.revision,
    short_hash(&record.fingerprint)
  )
}

/// Text lines of a build report: built, reused, failed, skipped, cancelled, then warnings.
pub fn report_lines(report: &BuildReport) -> Vec<ReportLine> {
  let mut lines = Vec::with_capacity(report.total() + report.warnings.len());
  lines.extend(report.built.iter().map(|r| ReportLine::new(Outcome::Installed, installed("built", r))));
  lines.extend(report.reused.iter().map(|r| ReportLine::new(Outcome::Installed, installed("reused", r))));
  lines.extend(
    report
      .failed
      .iter()
      .map(|f| ReportLine::new(Outcome::Failed, format!("{} failed: {}", f.name, f.error))),
  );
  lines.extend(report.skipped.iter().map(|s| {
    ReportLine::new(
      Outcome::Notice,
      format!("{} skipped: {} failed", s.name, s.failed_dependency),
    )
  }));
  lines.extend(
    report
      .cancelled
      .iter()
      .map(|name| ReportLine::new(Outcome::Notice, format!("{} cancelled", name))),
  );
  lines.extend(report.warnings.iter().map(|w| ReportLine::new(Outcome::Notice, w.clone())));
  lines
}

pub fn print_report(report: &BuildReport) {
  for line in report_lines(report) {
    let mark = line.outcome.mark();
    match line.outcome {
      Outcome::Installed => println!("{} {}", mark.if_supports_color(Stream::Stdout, |s| s.green()), line.text),
      Outcome::Failed => eprintln!(
        "{} {}",
        mark.if_supports_color(Stream::Stderr, |s| s.red()),
        line.text.if_supports_color(Stream::Stderr, |s| s.red())
      ),
      Outcome::Notice => eprintln!(
        "{} {}",
        mark.if_supports_color(Stream::Stderr, |s| s.yellow()),
        line.text.if_supports_color(Stream::Stderr, |s| s.yellow())
      ),
    }
  }
}

/// `→ <name> <version> <short fingerprint> <commit>`; `-` for anything not planned yet.
pub fn plan_line(spec: &Spec) -> String {
  format!(
    "→ {} {} {} {}",
    spec.name,
    spec.version,
    spec.fingerprint.as_ref().map(short_hash).unwrap_or("-"),
    spec.commit_hash.as_deref().unwrap_or("-")
  )
}

pub fn print_heading(message: &str) {
  println!("{} {}", "•".if_supports_color(Stream::Stdout, |s| s.blue()), message);
}

pub fn print_field(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

/// Wall-clock time in the coarsest unit that still says something.
pub fn elapsed(duration: Duration) -> String {
  let millis = duration.as_millis();
  match millis {
    0..1_000 => format!("{}ms", millis),
    1_000..60_000 => format!("{:.1}s", duration.as_secs_f64()),
    _ => format!("{}m{:02}s", millis / 60_000, (millis / 1_000) % 60),
  }
}

/// Pretty JSON on stdout, for `--output json`.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let mut out = std::io::stdout().lock();
  serde_json::to_writer_pretty(&mut out, value).context("Failed to write JSON output")?;
  writeln!(out).context("Failed to write JSON output")
}

#[cfg(test)]
mod tests {
  use super::*;
  use aligot_lib::execute::{FailedPackage, SkippedPackage};
  use aligot_lib::recipe::parse::parse_recipe;
  use std::path::PathBuf;

  fn fp() -> Fingerprint {
    Fingerprint("0123456789abcdef".repeat(4))
  }

  fn record(name: &str) -> PackageRecord {
    PackageRecord {
      name: name.to_string(),
      version: "v1".to_string(),
      revision: 2,
      fingerprint: fp(),
      install_root: PathBuf::from("/sw/x86_64").join(name).join("v1-2"),
      attempts: 1,
    }
  }

  #[test]
  fn report_lines_follow_package_outcomes() {
    let mut report = BuildReport::default();
    report.built.push(record("zlib"));
    report.reused.push(record("cmake"));
    report.failed.push(FailedPackage {
      name: "ROOT".to_string(),
      error: "exit code 2".to_string(),
    });
    report.skipped.push(SkippedPackage {
      name: "O2".to_string(),
      failed_dependency: "ROOT".to_string(),
    });
    report.cancelled.push("ninja".to_string());
    report.warnings.push("zlib: store is read-only".to_string());

    let lines = report_lines(&report);
    let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(
      texts,
      vec![
        "built zlib v1-2 (0123456789ab)",
        "reused cmake v1-2 (0123456789ab)",
        "ROOT failed: exit code 2",
        "O2 skipped: ROOT failed",
        "ninja cancelled",
        "zlib: store is read-only",
      ]
    );
    let outcomes: Vec<Outcome> = lines.iter().map(|l| l.outcome).collect();
    assert_eq!(
      outcomes,
      vec![
        Outcome::Installed,
        Outcome::Installed,
        Outcome::Failed,
        Outcome::Notice,
        Outcome::Notice,
        Outcome::Notice,
      ]
    );
  }

  #[test]
  fn plan_line_marks_missing_fields() {
    let (header, body) = parse_recipe("zlib", "package: zlib\nversion: v1.3\n---\nmake\n").unwrap();
    let mut spec = Spec::from_header(header, body);
    assert_eq!(plan_line(&spec), "→ zlib v1.3 - -");

    spec.fingerprint = Some(fp());
    spec.commit_hash = Some("0".to_string());
    assert_eq!(plan_line(&spec), "→ zlib v1.3 0123456789ab 0");
  }

  #[test]
  fn elapsed_picks_a_unit() {
    assert_eq!(elapsed(Duration::from_millis(50)), "50ms");
    assert_eq!(elapsed(Duration::from_millis(1_500)), "1.5s");
    assert_eq!(elapsed(Duration::from_secs(125)), "2m05s");
  }
}
