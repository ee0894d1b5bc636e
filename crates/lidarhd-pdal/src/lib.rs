//! # lidarhd-pdal
//!
//! Rasterize LiDAR point clouds by delegating to [PDAL](https://pdal.io).
//!
//! This crate never touches point data itself. It builds a declarative PDAL
//! pipeline (input → optional classification filter → GDAL writer) and hands it
//! to the `pdal` executable.
//!
//! ## Example
//!
//! ```no_run
//! use lidarhd_pdal::{build_pipeline, ClassSelector, PdalEngine};
//! use std::path::Path;
//!
//! let classes = ClassSelector::explicit([2, 3])?;
//! let spec = build_pipeline(
//!     Path::new("tiles/LHD_FXX_0600_6800.copc.laz"),
//!     Path::new("tiles"),
//!     &classes,
//!     0.5,
//! );
//!
//! let outcome = PdalEngine::default().execute(&spec);
//! println!("{:?}", outcome);
//! # Ok::<(), lidarhd_pdal::PdalError>(())
//! ```

mod error;
mod executor;
mod pipeline;

pub use error::PdalError;
pub use executor::{ExecutionOutcome, PdalEngine, DEFAULT_PDAL_ARGS, DEFAULT_PDAL_PROGRAM};
pub use pipeline::{
    build_pipeline, raster_path, ClassSelector, GdalWriter, Operation, ProcessingPipelineSpec,
    Stage, ALL_CLASSES_TOKEN, DEFAULT_CLASSES, NODATA,
};

/// Result type for PDAL operations.
pub type Result<T> = std::result::Result<T, PdalError>;
