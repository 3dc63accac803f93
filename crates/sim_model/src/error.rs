//! Error types shared across the simulation framework.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by sampling, experiment setup, and persistence.
///
/// Failures inside a model run are not represented here: a run that panics
/// aborts the whole experiment by design, since a partial result would be
/// misleading.
#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid configuration, e.g. a range parameter without a sampling factor.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A file extension that the loader does not understand.
    #[error("file type '{0}' not supported")]
    UnsupportedFormat(String),

    /// No saved experiment matched the requested name/id.
    #[error("no experiment found with name '{name}' in path '{path}'")]
    ExperimentNotFound { name: String, path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
