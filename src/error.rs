use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the citation tooling library.
#[derive(Error, Debug)]
pub enum CiteError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' command not found. Please ensure it is installed and on PATH")]
    ToolNotFound(String),

    #[error("'{tool}' exited with status {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("'{tool}' timed out after {}s", .after.as_secs())]
    Timeout { tool: String, after: Duration },

    #[error("'{0}' returned empty output")]
    EmptyOutput(String),

    #[error("No valid source files for citation ({0})")]
    NoValidFiles(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CiteError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CiteError::Io {
            path: path.into(),
            source,
        }
    }
}
