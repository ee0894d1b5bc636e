//! # lidarhd-runner
//!
//! Ties the tile and PDAL crates together into the `lidarhd` command-line tool:
//! load the region and the catalog, download the intersecting tiles and
//! optionally rasterize each of them.
//!
//! ## Example
//!
//! ```no_run
//! use lidarhd_runner::{run, RunConfig, RunRequest};
//!
//! let request = RunRequest {
//!     region: "area.shp".into(),
//!     output_dir: "tiles".into(),
//!     rasterize: true,
//! };
//! let summary = run(&request, &RunConfig::default(), None)?;
//! println!("downloaded: {:?}", summary.downloaded_files());
//! # Ok::<(), lidarhd_runner::RunError>(())
//! ```

mod cli;
mod config;
mod error;
mod orchestrator;

pub use cli::Cli;
pub use config::{ClassToken, RunConfig, DEFAULT_CATALOG, DEFAULT_RESOLUTION};
pub use error::RunError;
pub use orchestrator::{
    run, run_with_fetcher, Orchestrator, RasterResult, RasterSettings, RunRequest, RunSummary,
};

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunError>;
