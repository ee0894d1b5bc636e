//! Command-line arguments of the `lidarhd` binary.

use crate::{ClassToken, Result, RunConfig, RunRequest};
use clap::Parser;
use std::path::PathBuf;

/// Download the LiDAR HD tiles covering a region and optionally rasterize them.
#[derive(Parser, Debug, Clone)]
#[command(name = "lidarhd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Region of interest shapefile
    #[arg(short, long)]
    pub input: PathBuf,

    /// Directory receiving tiles and rasters
    #[arg(short, long)]
    pub output: PathBuf,

    /// Print per-file progress (0 or 1)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub verbose: u8,

    /// Rasterize every downloaded tile (0 or 1)
    #[arg(long = "to-dtm", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub to_dtm: u8,

    /// Classification codes to keep, or ALL [default: 2 3 4 5]
    #[arg(long, num_args = 1..)]
    pub classes: Option<Vec<String>>,

    /// Raster cell size in metres [default: 0.5]
    #[arg(long)]
    pub res: Option<f64>,

    /// Tile catalog shapefile
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Catalog attribute holding the download URL
    #[arg(long)]
    pub url_field: Option<String>,

    /// PDAL executable
    #[arg(long)]
    pub pdal: Option<PathBuf>,

    /// Concurrent downloads and rasterizations
    #[arg(long)]
    pub jobs: Option<usize>,

    /// YAML file with default settings
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Whether per-file progress is printed.
    pub fn is_verbose(&self) -> bool {
        self.verbose == 1
    }

    /// Resolve the run request and the layered configuration.
    ///
    /// Settings are merged but not validated; [`run`](crate::run) does that.
    pub fn resolve(&self) -> Result<(RunRequest, RunConfig)> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_yaml_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(classes) = &self.classes {
            config.classes = classes.iter().cloned().map(ClassToken::Word).collect();
        }
        if let Some(res) = self.res {
            config.resolution = res;
        }
        if let Some(catalog) = &self.catalog {
            config.catalog = catalog.clone();
        }
        if let Some(url_field) = &self.url_field {
            config.url_field = url_field.clone();
        }
        if let Some(pdal) = &self.pdal {
            config.pdal_program = pdal.clone();
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        let request = RunRequest {
            region: self.input.clone(),
            output_dir: self.output.clone(),
            rasterize: self.to_dtm == 1,
        };
        Ok((request, config))
    }
}
