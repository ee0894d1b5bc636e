//! Error types for the tiles crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading catalogs or fetching tiles.
#[derive(Debug, Error)]
pub enum TilesError {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The shapefile could not be opened or decoded.
    #[error("Failed to read shapefile {path}: {source}")]
    Shapefile {
        /// Path of the shapefile.
        path: PathBuf,
        /// Underlying decoder error.
        #[source]
        source: shapefile::Error,
    },

    /// A catalog record does not carry the download URL attribute.
    #[error("Record {record} of {path} has no usable '{field}' attribute")]
    MissingUrlField {
        /// Path of the catalog.
        path: PathBuf,
        /// Zero-based record number.
        record: usize,
        /// Name of the URL attribute.
        field: String,
    },

    /// A shape could not be converted into a geometry.
    #[error("Invalid geometry in record {record} of {path}: {reason}")]
    InvalidGeometry {
        /// Path of the shapefile.
        path: PathBuf,
        /// Zero-based record number.
        record: usize,
        /// Reason for failure.
        reason: String,
    },

    /// HTTP request error when fetching tiles.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Remote server answered with a non-success status.
    #[error("Download of {url} failed: HTTP {status}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code returned by the server.
        status: u16,
    },

    /// The URL has no final path segment to name the local file after.
    #[error("URL has no file name: {0}")]
    NoFileName(String),

    /// Another URL already produced a file with the same name.
    #[error("Destination {file_name} already written from {claimed_by}")]
    NameCollision {
        /// Local file name both URLs map to.
        file_name: String,
        /// URL that owns the file.
        claimed_by: String,
    },

    /// Download tracker lock was poisoned (a thread panicked while holding the lock).
    #[error("Download tracker lock was poisoned")]
    TrackerLockPoisoned,

    /// Worker pool could not be created.
    #[error("Failed to build download worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
