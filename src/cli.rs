use std::path::PathBuf;

use clap::Parser;

use crate::config::{OutputFormat, Settings};

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
    /// Show all available debugging information
    Debug,
}

/// Validate textbook bundle repositories
#[derive(Parser, Debug, Clone)]
#[command(name = "bindery")]
#[command(about = "Validate the structure and cross-references of textbook bundle repositories")]
#[command(version)]
pub struct Cli {
    /// Bundle repository roots to validate
    #[arg(default_value = ".", help = "One or more bundle repository roots")]
    pub roots: Vec<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", conflicts_with = "quiet")]
    pub verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Show scheduler and model debugging output
    #[arg(long = "debug", conflicts_with = "quiet")]
    pub debug: bool,

    /// Report format
    #[arg(long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// Treat warnings like errors for the exit code
    #[arg(long = "fail-on-warnings")]
    pub fail_on_warnings: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.debug {
            VerbosityLevel::Debug
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

/// Effective per-root configuration: CLI flags over the root's settings
/// file over defaults
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub verbosity: VerbosityLevel,
    pub format: OutputFormat,
    pub fail_on_warnings: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli, settings: &Settings) -> Self {
        Self {
            verbosity: cli.verbosity(),
            format: cli.format.unwrap_or(settings.format),
            fail_on_warnings: cli.fail_on_warnings || settings.fail_on_warnings,
        }
    }
}
