//! Error types for PDAL pipeline operations

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when building or running a PDAL pipeline
#[derive(Debug, Error)]
pub enum PdalError {
    /// I/O error writing the pipeline description or talking to the engine
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipeline description could not be serialized or parsed
    #[error("Invalid pipeline JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// PDAL executable was not found
    #[error("PDAL executable not found: {program:?}")]
    EngineNotFound {
        /// Program that was looked up
        program: PathBuf,
    },

    /// PDAL could not be started
    #[error("Failed to start {program:?}: {source}")]
    Spawn {
        /// Program that was started
        program: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// PDAL ran but reported a failure
    #[error("PDAL pipeline failed ({status}): {stderr}")]
    EngineFailed {
        /// Exit status as reported by the OS
        status: String,
        /// Diagnostic text written by PDAL on stderr
        stderr: String,
    },

    /// PDAL did not finish within the configured time
    #[error("PDAL pipeline timed out after {0:?}")]
    Timeout(Duration),

    /// An explicit class selection without any class
    #[error("Classification list is empty")]
    EmptyClassSelection,

    /// A classification token that is neither a class code nor ALL
    #[error("Invalid classification code '{0}' (expected 0-255 or ALL)")]
    InvalidClassCode(String),
}
