//! Run configuration.
//!
//! Settings come from three layers: built-in defaults, an optional YAML file and
//! command-line flags, each overriding the previous one.

use crate::RunError;
use lidarhd_pdal::{ClassSelector, PdalEngine, DEFAULT_CLASSES, DEFAULT_PDAL_ARGS, DEFAULT_PDAL_PROGRAM};
use lidarhd_tiles::{DEFAULT_HTTP_TIMEOUT, DEFAULT_URL_FIELD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Catalog location used when none is configured.
pub const DEFAULT_CATALOG: &str = "./data/TA_diff_pkk_lidarhd_classe.shp";

/// Raster cell size used when none is configured.
pub const DEFAULT_RESOLUTION: f64 = 0.5;

/// One entry of the `classes` list: a numeric code or a keyword such as `ALL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassToken {
    /// Numeric classification code.
    Code(u64),
    /// Free-form token.
    Word(String),
}

impl fmt::Display for ClassToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassToken::Code(code) => write!(f, "{}", code),
            ClassToken::Word(word) => f.write_str(word),
        }
    }
}

/// Settings shared by every run.
///
/// ```yaml
/// catalog: ./data/TA_diff_pkk_lidarhd_classe.shp
/// url_field: url_telech
/// pdal_program: pdal
/// http_timeout_secs: 600
/// engine_timeout_secs: 3600
/// jobs: 4
/// resolution: 1.0
/// classes: [2, 9]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Tile catalog shapefile.
    pub catalog: PathBuf,
    /// Catalog attribute holding the download URL.
    pub url_field: String,
    /// PDAL executable.
    pub pdal_program: PathBuf,
    /// Arguments placed before the pipeline file.
    pub pdal_args: Vec<String>,
    /// Per-request HTTP timeout.
    pub http_timeout_secs: u64,
    /// Per-pipeline engine timeout, unlimited when absent.
    pub engine_timeout_secs: Option<u64>,
    /// Concurrent downloads and rasterizations.
    pub jobs: usize,
    /// Raster cell size in metres.
    pub resolution: f64,
    /// Classification codes to keep, or `ALL`.
    pub classes: Vec<ClassToken>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            catalog: PathBuf::from(DEFAULT_CATALOG),
            url_field: DEFAULT_URL_FIELD.to_string(),
            pdal_program: PathBuf::from(DEFAULT_PDAL_PROGRAM),
            pdal_args: DEFAULT_PDAL_ARGS.iter().map(|a| a.to_string()).collect(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
            engine_timeout_secs: None,
            jobs: 1,
            resolution: DEFAULT_RESOLUTION,
            classes: DEFAULT_CLASSES
                .iter()
                .map(|&code| ClassToken::Code(u64::from(code)))
                .collect(),
        }
    }
}

impl RunConfig {
    /// Load a YAML file. Keys missing from the file keep their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, RunError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RunError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text).map_err(|source| RunError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse YAML text. An empty document yields the defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Check every setting, before anything is downloaded.
    pub fn validate(&self) -> Result<(), RunError> {
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(RunError::InvalidConfig(format!(
                "resolution must be a positive number, got {}",
                self.resolution
            )));
        }
        if self.jobs == 0 {
            return Err(RunError::InvalidConfig("jobs must be at least 1".to_string()));
        }
        if self.url_field.trim().is_empty() {
            return Err(RunError::InvalidConfig("url_field must not be empty".to_string()));
        }
        if self.pdal_program.as_os_str().is_empty() {
            return Err(RunError::InvalidConfig(
                "pdal_program must not be empty".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(RunError::InvalidConfig(
                "http_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.engine_timeout_secs == Some(0) {
            return Err(RunError::InvalidConfig(
                "engine_timeout_secs must be at least 1 when set".to_string(),
            ));
        }
        self.class_selector()?;
        Ok(())
    }

    /// Classification selection described by `classes`.
    pub fn class_selector(&self) -> Result<ClassSelector, RunError> {
        let tokens: Vec<String> = self.classes.iter().map(ToString::to_string).collect();
        Ok(ClassSelector::from_tokens(&tokens)?)
    }

    /// HTTP timeout as a duration.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Engine configured from `pdal_program`, `pdal_args` and `engine_timeout_secs`.
    pub fn engine(&self) -> PdalEngine {
        PdalEngine::new(&self.pdal_program)
            .with_args(self.pdal_args.iter().cloned())
            .with_timeout(self.engine_timeout_secs.map(Duration::from_secs))
    }
}
