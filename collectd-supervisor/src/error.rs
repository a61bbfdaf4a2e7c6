//! Error types for the supervisor.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the supervisor's public operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// An accessor was called before any configuration was supplied.
    #[error("collectd has not been configured")]
    NotConfigured,

    /// The supplied configuration failed validation.
    #[error("invalid collectd configuration: {0}")]
    InvalidConfig(String),

    /// Monitor ids are routing keys and must not be empty.
    #[error("monitor id must not be empty")]
    EmptyMonitorId,

    /// The write-back server could not bind its listener.
    #[error("write server failed to start on {addr}: {source}")]
    WriteServer {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A configuration template failed to render.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Reading or writing a configuration file failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SupervisorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SupervisorError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors produced while parsing or rendering a configuration template.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The template text is malformed.
    #[error("template {template}: line {line}: {message}")]
    Parse {
        template: String,
        line: usize,
        message: String,
    },

    /// A substitution referenced a key that is absent or null.
    #[error("template {template}: missing value for `{key}`")]
    MissingKey { template: String, key: String },

    /// A substitution resolved to an object or array.
    #[error("template {template}: `{key}` is not a scalar value")]
    NotScalar { template: String, key: String },

    /// The render context could not be built.
    #[error("failed to build template context: {0}")]
    Context(#[from] serde_json::Error),
}

/// Errors produced while decoding a write-back request body.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not a JSON array of collectd records.
    #[error("malformed write_http payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;
