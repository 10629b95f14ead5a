//! Report formatting
//!
//! Turns a collected diagnostic set into the CLI's human-readable (or
//! JSON) report, in the shape `path line:col message` per finding.

use serde::Serialize;

use crate::cli::VerbosityLevel;
use crate::diagnostics::{Diagnostic, Severity};

/// Findings for one file, path relative to the validated root
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Everything the CLI reports about one repository root
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub root: String,
    pub books: usize,
    pub pages: usize,
    pub resources: usize,
    pub errors: usize,
    pub warnings: usize,
    pub files: Vec<FileReport>,
}

impl ValidationReport {
    pub fn failure_count(&self, fail_on_warnings: bool) -> usize {
        if fail_on_warnings {
            self.errors + self.warnings
        } else {
            self.errors
        }
    }
}

/// Simple output formatter for human-readable results
pub struct Output {
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    #[cfg(test)]
    fn plain(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: false,
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    fn severity_label(&self, severity: Severity) -> String {
        match severity {
            Severity::Error => self.colorize("error", "31"),
            Severity::Warning => self.colorize("warning", "33"),
        }
    }

    pub fn format_report(&self, report: &ValidationReport) -> String {
        let mut out = String::new();

        if self.verbosity == VerbosityLevel::Quiet {
            if report.errors > 0 || report.warnings > 0 {
                out.push_str(&format!(
                    "Errors: {} Warnings: {}\n",
                    report.errors, report.warnings
                ));
            }
            return out;
        }

        out.push_str(&format!("Validating {}\n", report.root));
        for file in &report.files {
            for diagnostic in &file.diagnostics {
                out.push_str(&format!(
                    "{} {}:{} {} {}",
                    file.path,
                    diagnostic.range.start.line,
                    diagnostic.range.start.character,
                    self.severity_label(diagnostic.severity),
                    diagnostic.message,
                ));
                if self.verbosity >= VerbosityLevel::Verbose {
                    out.push_str(&format!(" [{}]", diagnostic.code));
                }
                out.push('\n');
            }
        }
        out.push_str(&format!(
            "Books: {}  Pages: {}  Resources: {}\n",
            report.books, report.pages, report.resources
        ));
        let summary = format!(
            "Validation errors: {}  warnings: {}",
            report.errors, report.warnings
        );
        if report.errors > 0 {
            out.push_str(&self.colorize(&summary, "31"));
        } else {
            out.push_str(&self.colorize(&summary, "32"));
        }
        out.push('\n');
        out
    }

    pub fn format_json(&self, report: &ValidationReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|e| {
            format!("{{\"error\": \"failed to serialize report: {}\"}}", e)
        })
    }
}
