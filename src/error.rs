use thiserror::Error;

/// Failure modes of the library surface.
///
/// Validation findings are not errors in this sense: they are data
/// (diagnostics) produced by the model. This type covers the operational
/// failures around the model — I/O, settings, scheduler faults.
#[derive(Error, Debug)]
pub enum BinderyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings error: {path} - {details}")]
    Settings { path: String, details: String },

    #[error("job '{kind}' failed: {details}")]
    JobFailed { kind: String, details: String },

    #[error("workspace root does not exist: {path}")]
    WorkspaceNotFound { path: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BinderyError>;
