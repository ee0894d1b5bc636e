//! Match, download and rasterize.

use crate::{Result, RunConfig};
use lidarhd_pdal::{build_pipeline, ClassSelector, ExecutionOutcome, PdalEngine};
use lidarhd_tiles::{
    match_tiles, DownloadReport, DownloadStats, Downloader, Fetch, HttpFetcher, ProgressCallback,
    TileIndex, UserRegion,
};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a single invocation of the tool is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Region of interest shapefile.
    pub region: PathBuf,
    /// Directory receiving tiles and rasters.
    pub output_dir: PathBuf,
    /// Whether downloaded tiles are turned into rasters.
    pub rasterize: bool,
}

/// Parameters of the rasterization stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterSettings {
    /// Classes kept in the raster.
    pub classes: ClassSelector,
    /// Cell size in metres.
    pub resolution: f64,
}

/// Rasterization outcome for one downloaded tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterResult {
    /// Point cloud that was read.
    pub input: PathBuf,
    /// Raster that was requested.
    pub output: PathBuf,
    /// What happened.
    pub outcome: ExecutionOutcome,
}

/// Everything a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of unique URLs matched.
    pub matched: usize,
    /// Per-URL download results.
    pub downloads: DownloadReport,
    /// Files and bytes written by the downloader.
    pub stats: DownloadStats,
    /// Per-file rasterization results, empty when rasterization was not requested.
    pub rasters: Vec<RasterResult>,
}

impl RunSummary {
    /// File names of the successful downloads.
    pub fn downloaded_files(&self) -> Vec<String> {
        self.downloads.downloaded_files()
    }

    /// Number of rasters produced.
    pub fn rasters_succeeded(&self) -> usize {
        self.rasters.iter().filter(|r| r.outcome.is_success()).count()
    }

    /// Number of rasters that could not be produced.
    pub fn rasters_failed(&self) -> usize {
        self.rasters.len() - self.rasters_succeeded()
    }
}

/// Sequences the matcher, the downloader and the PDAL stage.
pub struct Orchestrator<F: Fetch> {
    downloader: Downloader<F>,
    engine: PdalEngine,
    raster: Option<RasterSettings>,
    /// Worker pool for rasterization, `None` for sequential processing.
    pool: Option<rayon::ThreadPool>,
}

impl<F: Fetch> Orchestrator<F> {
    /// Download only, sequentially.
    pub fn new(downloader: Downloader<F>) -> Self {
        Self {
            downloader,
            engine: PdalEngine::default(),
            raster: None,
            pool: None,
        }
    }

    /// Rasterize every downloaded tile with `engine`.
    pub fn with_rasterization(mut self, engine: PdalEngine, settings: RasterSettings) -> Self {
        self.engine = engine;
        self.raster = Some(settings);
        self
    }

    /// Run up to `jobs` rasterizations at once. `jobs <= 1` stays sequential.
    pub fn with_jobs(mut self, jobs: usize) -> Result<Self> {
        self.pool = if jobs > 1 {
            Some(rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?)
        } else {
            None
        };
        Ok(self)
    }

    /// Directory receiving tiles and rasters.
    pub fn output_dir(&self) -> &Path {
        self.downloader.destination()
    }

    /// Process the region against the catalog.
    ///
    /// Per-item failures are recorded in the summary; nothing here aborts.
    pub fn run(
        &self,
        region: &UserRegion,
        catalog: &TileIndex,
        callback: Option<&ProgressCallback>,
    ) -> RunSummary {
        let urls = match_tiles(region, catalog);
        if urls.is_empty() {
            info!("region does not intersect any catalog tile");
        }

        let downloads = self.downloader.download_all(&urls, callback);
        let rasters = match &self.raster {
            Some(settings) => self.rasterize(&downloads.downloaded_files(), settings, callback),
            None => Vec::new(),
        };

        RunSummary {
            matched: urls.len(),
            downloads,
            stats: self.downloader.download_stats(),
            rasters,
        }
    }

    /// Rasterize downloaded files, each independently of the others.
    pub fn rasterize(
        &self,
        files: &[String],
        settings: &RasterSettings,
        callback: Option<&ProgressCallback>,
    ) -> Vec<RasterResult> {
        info!(count = files.len(), classes = %settings.classes, "rasterizing tiles");

        let results: Vec<RasterResult> = match &self.pool {
            Some(pool) => pool.install(|| {
                files
                    .par_iter()
                    .map(|file| self.rasterize_one(file, settings, callback))
                    .collect()
            }),
            None => files
                .iter()
                .map(|file| self.rasterize_one(file, settings, callback))
                .collect(),
        };

        let failed = results.iter().filter(|r| !r.outcome.is_success()).count();
        info!(
            succeeded = results.len() - failed,
            failed,
            "rasterization complete"
        );
        results
    }

    fn rasterize_one(
        &self,
        file: &str,
        settings: &RasterSettings,
        callback: Option<&ProgressCallback>,
    ) -> RasterResult {
        let output_dir = self.downloader.destination();
        let input = output_dir.join(file);
        let spec = build_pipeline(&input, output_dir, &settings.classes, settings.resolution);
        let output = spec
            .output_path()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        if let Some(cb) = callback {
            cb(&format!("Rasterizing file: {}", file));
        }
        debug!(input = %input.display(), output = %output.display(), "building raster");

        let outcome = self.engine.execute(&spec);
        match &outcome {
            ExecutionOutcome::Succeeded => {
                if let Some(cb) = callback {
                    cb(&format!("Raster done for file: {}", output.display()));
                }
            }
            ExecutionOutcome::Failed { reason } => {
                warn!(input = %input.display(), reason = %reason, "rasterization failed");
                if let Some(cb) = callback {
                    cb(&format!("Rasterization failed for file: {}", file));
                }
            }
        }

        RasterResult {
            input,
            output,
            outcome,
        }
    }
}

/// Run the tool against the live catalog server.
///
/// The configuration is validated by [`run_with_fetcher`] before anything is fetched.
pub fn run(
    request: &RunRequest,
    config: &RunConfig,
    callback: Option<&ProgressCallback>,
) -> Result<RunSummary> {
    let fetcher = HttpFetcher::with_timeout(config.http_timeout())?;
    run_with_fetcher(request, config, fetcher, callback)
}

/// Run the tool with a caller-supplied fetcher.
///
/// Every configuration problem is reported before the output directory is
/// touched or anything is fetched.
pub fn run_with_fetcher<F: Fetch>(
    request: &RunRequest,
    config: &RunConfig,
    fetcher: F,
    callback: Option<&ProgressCallback>,
) -> Result<RunSummary> {
    config.validate()?;
    let classes = config.class_selector()?;

    let region = UserRegion::from_shapefile(&request.region)?;
    let catalog = TileIndex::from_shapefile(&config.catalog, &config.url_field)?;
    info!(
        region_geometries = region.geometries().len(),
        catalog_tiles = catalog.len(),
        "inputs loaded"
    );

    let downloader = Downloader::new(fetcher, &request.output_dir)?.with_jobs(config.jobs)?;
    let mut orchestrator = Orchestrator::new(downloader).with_jobs(config.jobs)?;
    if request.rasterize {
        orchestrator = orchestrator.with_rasterization(
            config.engine(),
            RasterSettings {
                classes,
                resolution: config.resolution,
            },
        );
    }

    Ok(orchestrator.run(&region, &catalog, callback))
}
