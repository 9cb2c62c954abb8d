mod cmd;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aligot_lib::consts::APP_NAME;

use crate::cmd::BuildArgs;
use crate::output::OutputFormat;

/// aligot - build trees of interdependent packages from recipes
#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  debug: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build packages and everything they require
  Build(BuildArgs),

  /// Show build order, commits and fingerprints without building
  Plan(BuildArgs),
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.debug { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build(args) => cmd::cmd_build(&args, cli.output),
    Commands::Plan(args) => cmd::cmd_plan(&args, cli.output),
  }
}
