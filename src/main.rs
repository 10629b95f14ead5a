//! bindery CLI
//!
//! Batch validator: point it at one or more bundle repository roots and it
//! loads the whole model, chases validation dependencies to a fixpoint,
//! prints every finding as `path line:col message`, and exits with the
//! number of failures.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use bindery::bundle::Bundle;
use bindery::cli::{Cli, Config, VerbosityLevel};
use bindery::config::{OutputFormat, Settings};
use bindery::diagnostics::{CollectingSink, DiagnosticSink, Severity};
use bindery::error::BinderyError;
use bindery::manager::ModelManager;
use bindery::output::{FileReport, Output, ValidationReport};
use bindery::paths::SlashPathHelper;

fn init_tracing(verbosity: VerbosityLevel) {
    let default = match verbosity {
        VerbosityLevel::Debug => "bindery=debug",
        VerbosityLevel::Verbose => "bindery=info",
        _ => "bindery=warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbosity());

    let mut failures = 0usize;
    for root in &cli.roots {
        let settings = match Settings::load(root) {
            Ok(settings) => settings,
            Err(err) => {
                eprintln!("bindery: {err}");
                return ExitCode::FAILURE;
            }
        };
        let config = Config::from_cli(&cli, &settings);
        match validate_root(root, &config).await {
            Ok(report) => {
                let output = Output::new(config.verbosity);
                let rendered = match config.format {
                    OutputFormat::Json => output.format_json(&report),
                    OutputFormat::Text => output.format_report(&report),
                };
                print!("{rendered}");
                failures += report.failure_count(config.fail_on_warnings);
            }
            Err(err) => {
                eprintln!("bindery: {err:#}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::from(failures.min(u8::MAX as usize) as u8)
}

async fn validate_root(root: &Path, _config: &Config) -> Result<ValidationReport> {
    if !root.exists() {
        return Err(BinderyError::WorkspaceNotFound {
            path: root.display().to_string(),
        }
        .into());
    }
    let root = root
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", root.display()))?;
    let root_str = root.to_string_lossy().replace('\\', "/");

    let bundle = Bundle::new(Arc::new(SlashPathHelper), &root_str);
    let sink = Arc::new(CollectingSink::new());
    let manager = ModelManager::new(
        Arc::clone(&bundle),
        Arc::clone(&sink) as Arc<dyn DiagnosticSink>,
        None,
    );

    // register orphans first so the sweep sees every file, then queue the
    // full cold-start load
    manager.load_enough_for_orphans().await;
    manager.perform_initial_validation();

    // drain to a fixpoint; individual job faults are logged, not fatal
    let mut attempts = 0;
    while let Err(err) = manager.job_runner().done().await {
        tracing::warn!(error = %err, "job stream fault");
        attempts += 1;
        if attempts > 100 {
            break;
        }
    }

    let prefix = format!("{root_str}/");
    let files = sink
        .non_empty()
        .into_iter()
        .map(|(uri, diagnostics)| FileReport {
            path: uri.strip_prefix(&prefix).unwrap_or(&uri).to_string(),
            diagnostics,
        })
        .collect();

    Ok(ValidationReport {
        root: root_str,
        books: bundle.book_factory().len(),
        pages: bundle.pages().len(),
        resources: bundle.resources().len(),
        errors: sink.count_by_severity(Severity::Error),
        warnings: sink.count_by_severity(Severity::Warning),
        files,
    })
}
