//! # lidarhd-tiles
//!
//! Locate and download LiDAR HD point-cloud tiles covering a region of interest.
//!
//! ## Overview
//!
//! The provider publishes a static tile catalog: a shapefile with one polygon
//! footprint per tile and an attribute holding the tile's download URL
//! (`url_telech`). This crate:
//! - loads the catalog into an R-tree backed [`TileIndex`]
//! - loads the caller's region of interest as a [`UserRegion`]
//! - intersects the two into a deduplicated [`MatchSet`] of URLs
//! - downloads the matched tiles with a [`Downloader`], recording a per-URL
//!   outcome instead of stopping at the first failure
//!
//! ## Example
//!
//! ```no_run
//! use lidarhd_tiles::{match_tiles, Downloader, HttpFetcher, ProgressCallback, TileIndex, UserRegion};
//!
//! let catalog = TileIndex::from_shapefile("data/TA_diff_pkk_lidarhd_classe.shp", "url_telech")?;
//! let region = UserRegion::from_shapefile("area.shp")?;
//! let urls = match_tiles(&region, &catalog);
//!
//! let downloader = Downloader::new(HttpFetcher::new()?, "tiles")?;
//! let callback: ProgressCallback = Box::new(|msg: &str| println!("{}", msg));
//! let report = downloader.download_all(&urls, Some(&callback));
//! println!("downloaded: {:?}", report.downloaded_files());
//! # Ok::<(), lidarhd_tiles::TilesError>(())
//! ```

mod catalog;
mod download;
mod error;
mod matcher;

pub use catalog::{TileIndex, TileRecord, UserRegion, DEFAULT_URL_FIELD};
pub use download::{
    url_file_name, DownloadOutcome, DownloadReport, DownloadResult, DownloadStats, Downloader,
    Fetch, FetchResponse, HttpFetcher, ProgressCallback, DEFAULT_HTTP_TIMEOUT,
};
pub use error::TilesError;
pub use matcher::{match_tiles, MatchSet};

/// Result type for tile operations.
pub type Result<T> = std::result::Result<T, TilesError>;
