//! Error types for the runner.

use lidarhd_pdal::PdalError;
use lidarhd_tiles::TilesError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a run before any tile is processed.
///
/// Failures of individual downloads or rasterizations never surface here; they
/// are recorded in the [`RunSummary`](crate::RunSummary).
#[derive(Debug, Error)]
pub enum RunError {
    /// A setting is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The YAML configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML configuration file is malformed.
    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_yaml::Error,
    },

    /// Region, catalog, output directory or HTTP client could not be set up.
    #[error(transparent)]
    Tiles(#[from] TilesError),

    /// Classification selection is invalid.
    #[error(transparent)]
    Pdal(#[from] PdalError),

    /// Rasterization worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
