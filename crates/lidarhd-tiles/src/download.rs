//! Batch download of matched tiles.
//!
//! Each URL is fetched once and its payload is written to
//! `destination/<last URL path segment>`. A failing URL never aborts the batch:
//! its outcome is recorded in the [`DownloadReport`] and the loop moves on.
//!
//! ## Thread Safety
//!
//! With more than one job the downloader runs on a bounded rayon pool:
//! - Different URLs are downloaded in parallel
//! - Two URLs that map to the same local file name coordinate through a claim
//!   table, so only one of them ever writes the file
//! - Payloads are staged in a temporary file and renamed into place, so a failed
//!   or interrupted download never leaves a partial file behind

use crate::{MatchSet, Result, TilesError};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for a single tile request. LiDAR HD tiles weigh a few
/// hundred megabytes.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(600);

/// Callback for download progress messages.
pub type ProgressCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Status and payload returned by a [`Fetch`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body. Empty when the status is not a success.
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Whether the status is in the 2xx success class.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can retrieve a URL.
pub trait Fetch: Send + Sync {
    /// Fetch `url`, returning its status and, on success, the full payload.
    fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

/// [`Fetch`] implementation backed by a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    /// Create a fetcher with a specific request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse> {
        let response = self.client.get(url).send()?;
        let status = response.status();

        if !status.is_success() {
            return Ok(FetchResponse {
                status: status.as_u16(),
                body: Vec::new(),
            });
        }

        let body = response.bytes()?.to_vec();
        Ok(FetchResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// Outcome of one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Payload written to disk.
    Succeeded {
        /// Size of the written file.
        bytes: u64,
    },
    /// URL skipped; nothing was written.
    Failed {
        /// Human readable reason.
        reason: String,
    },
}

/// Result of downloading a single URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    /// Requested URL.
    pub url: String,
    /// Local file name inside the destination directory, when the URL has one.
    pub file_name: Option<String>,
    /// What happened.
    pub outcome: DownloadOutcome,
}

impl DownloadResult {
    /// Whether the payload was written.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DownloadOutcome::Succeeded { .. })
    }
}

/// Per-URL results of a batch, in match-set order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// One result per requested URL.
    pub results: Vec<DownloadResult>,
}

impl DownloadReport {
    /// File names of the successful downloads, in match-set order.
    pub fn downloaded_files(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| r.file_name.clone())
            .collect()
    }

    /// Results of the failed downloads.
    pub fn failures(&self) -> impl Iterator<Item = &DownloadResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Number of successful downloads.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Number of failed downloads.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Download statistics for the downloader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Number of files written this session.
    pub files_downloaded: usize,
    /// Total bytes written this session.
    pub bytes_downloaded: u64,
}

/// State of a local file name during the batch.
#[derive(Debug, Clone)]
enum Claim {
    /// A download into this name is in progress, by the given URL.
    InProgress(String),
    /// The file was written from the given URL.
    Complete(String),
}

/// Tracks which local file names are taken to prevent two URLs writing the same file.
struct DownloadTracker {
    claims: HashMap<String, Claim>,
}

impl DownloadTracker {
    fn new() -> Self {
        Self {
            claims: HashMap::new(),
        }
    }
}

/// Downloads matched tiles into a destination directory.
pub struct Downloader<F: Fetch> {
    fetcher: F,
    destination: PathBuf,
    /// Worker pool, `None` for sequential downloads.
    pool: Option<rayon::ThreadPool>,
    tracker: Mutex<DownloadTracker>,
    /// Signalled whenever an in-progress claim is settled.
    claim_settled: Condvar,
    files_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
}

impl<F: Fetch> std::fmt::Debug for Downloader<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("destination", &self.destination)
            .field("parallel", &self.pool.is_some())
            .finish()
    }
}

impl<F: Fetch> Downloader<F> {
    /// Create a sequential downloader writing into `destination`.
    ///
    /// The directory is created if it does not exist.
    pub fn new<P: AsRef<Path>>(fetcher: F, destination: P) -> Result<Self> {
        let destination = destination.as_ref().to_path_buf();
        fs::create_dir_all(&destination)?;

        Ok(Self {
            fetcher,
            destination,
            pool: None,
            tracker: Mutex::new(DownloadTracker::new()),
            claim_settled: Condvar::new(),
            files_downloaded: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
        })
    }

    /// Download with up to `jobs` concurrent requests. `jobs <= 1` stays sequential.
    pub fn with_jobs(mut self, jobs: usize) -> Result<Self> {
        self.pool = if jobs > 1 {
            Some(rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?)
        } else {
            None
        };
        Ok(self)
    }

    /// Destination directory.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Get download statistics for this session.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            files_downloaded: self.files_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }

    /// Download every URL of the match set.
    ///
    /// Never fails as a whole: each URL gets its own [`DownloadResult`]. The
    /// callback receives status lines for user feedback.
    pub fn download_all(
        &self,
        urls: &MatchSet,
        callback: Option<&ProgressCallback>,
    ) -> DownloadReport {
        let urls: Vec<&str> = urls.iter().collect();
        info!(count = urls.len(), destination = %self.destination.display(), "downloading tiles");
        self.begin_batch();

        let results: Vec<DownloadResult> = match &self.pool {
            Some(pool) => pool.install(|| {
                urls.par_iter()
                    .map(|url| self.download_one(url, callback))
                    .collect()
            }),
            None => urls
                .iter()
                .map(|url| self.download_one(url, callback))
                .collect(),
        };

        let report = DownloadReport { results };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "download batch complete"
        );
        report
    }

    /// Forget names written by earlier batches. In-flight claims are kept.
    fn begin_batch(&self) {
        match self.tracker.lock() {
            Ok(mut tracker) => tracker
                .claims
                .retain(|_, claim| matches!(claim, Claim::InProgress(_))),
            Err(_) => warn!("download tracker lock poisoned"),
        }
    }

    /// Download a single URL, absorbing any failure into the result.
    pub fn download_one(&self, url: &str, callback: Option<&ProgressCallback>) -> DownloadResult {
        if let Some(cb) = callback {
            cb(&format!("Downloading file from: {}", url));
        }

        let file_name = match url_file_name(url) {
            Ok(name) => name,
            Err(e) => return self.failed(url, None, e, callback),
        };

        if let Err(e) = self.claim(&file_name, url) {
            return self.failed(url, Some(file_name), e, callback);
        }

        let result = self.fetch_to_file(url, &file_name);
        self.settle(&file_name, url, result.is_ok());

        match result {
            Ok(bytes) => {
                debug!(url, file_name = %file_name, bytes, "download complete");
                if let Some(cb) = callback {
                    cb(&format!("Download done for file: {}", file_name));
                }
                DownloadResult {
                    url: url.to_string(),
                    file_name: Some(file_name),
                    outcome: DownloadOutcome::Succeeded { bytes },
                }
            }
            Err(e) => self.failed(url, Some(file_name), e, callback),
        }
    }

    fn failed(
        &self,
        url: &str,
        file_name: Option<String>,
        error: TilesError,
        callback: Option<&ProgressCallback>,
    ) -> DownloadResult {
        warn!(url, error = %error, "download failed");
        if let Some(cb) = callback {
            cb(&format!("Download failed for file: {}", url));
        }
        DownloadResult {
            url: url.to_string(),
            file_name,
            outcome: DownloadOutcome::Failed {
                reason: error.to_string(),
            },
        }
    }

    /// Reserve `file_name` for `url`.
    ///
    /// Waits while another URL is writing the same name. Fails if the name was
    /// already written during this batch; names from earlier batches are
    /// cleared by [`Downloader::download_all`].
    fn claim(&self, file_name: &str, url: &str) -> Result<()> {
        let mut tracker = self
            .tracker
            .lock()
            .map_err(|_| TilesError::TrackerLockPoisoned)?;

        loop {
            match tracker.claims.get(file_name) {
                Some(Claim::InProgress(_)) => {
                    tracker = self
                        .claim_settled
                        .wait(tracker)
                        .map_err(|_| TilesError::TrackerLockPoisoned)?;
                }
                Some(Claim::Complete(owner)) => {
                    return Err(TilesError::NameCollision {
                        file_name: file_name.to_string(),
                        claimed_by: owner.clone(),
                    });
                }
                None => {
                    tracker
                        .claims
                        .insert(file_name.to_string(), Claim::InProgress(url.to_string()));
                    return Ok(());
                }
            }
        }
    }

    /// Settle a claim: keep it if the file was written, release it otherwise.
    fn settle(&self, file_name: &str, url: &str, written: bool) {
        match self.tracker.lock() {
            Ok(mut tracker) => {
                if written {
                    tracker
                        .claims
                        .insert(file_name.to_string(), Claim::Complete(url.to_string()));
                } else {
                    tracker.claims.remove(file_name);
                }
            }
            Err(_) => warn!(file_name, "download tracker lock poisoned"),
        }
        self.claim_settled.notify_all();
    }

    /// Fetch `url` and move its payload to `destination/file_name`.
    fn fetch_to_file(&self, url: &str, file_name: &str) -> Result<u64> {
        let response = self.fetcher.fetch(url)?;
        if !response.is_success() {
            return Err(TilesError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        let mut staged = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(&self.destination)?;
        staged.write_all(&response.body)?;
        staged.flush()?;
        staged
            .persist(self.destination.join(file_name))
            .map_err(|e| e.error)?;

        let bytes = response.body.len() as u64;
        self.files_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
        Ok(bytes)
    }
}

/// Last path segment of a URL, used as the local file name.
pub fn url_file_name(url: &str) -> Result<String> {
    let parsed =
        reqwest::Url::parse(url).map_err(|_| TilesError::NoFileName(url.to_string()))?;
    parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TilesError::NoFileName(url.to_string()))
}
