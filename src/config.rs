//! Workspace settings
//!
//! An optional `bindery.toml` at the repository root supplies defaults
//! that CLI flags override.

use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{BinderyError, Result};

pub const SETTINGS_FILE: &str = "bindery.toml";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Report format for the CLI
    pub format: OutputFormat,
    /// Treat warnings like errors for the exit code
    pub fail_on_warnings: bool,
}

impl Settings {
    /// Load `<root>/bindery.toml` when present; defaults otherwise
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(SETTINGS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).map_err(|e| BinderyError::Settings {
                path: path.display().to_string(),
                details: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}
