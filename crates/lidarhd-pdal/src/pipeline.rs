//! Declarative PDAL pipeline construction.
//!
//! A rasterization pipeline has at most three stages, in this order:
//! 1. the input point cloud, given as a bare file name
//! 2. an optional `filters.expression` stage keeping the selected classes
//! 3. a `writers.gdal` stage gridding the points with inverse distance weighting
//!
//! PDAL executes stages in the order they appear, so the filter always sits
//! between the reader and the writer.

use crate::{PdalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Token selecting every classification.
pub const ALL_CLASSES_TOKEN: &str = "ALL";

/// Classes rasterized when none are given: ground and the three vegetation classes.
pub const DEFAULT_CLASSES: [u8; 4] = [2, 3, 4, 5];

/// Value written to raster cells without points.
pub const NODATA: i32 = -9999;

/// GDAL driver of the output raster.
pub const GDAL_DRIVER: &str = "GTiff";

/// Interpolation used by `writers.gdal` (inverse distance weighting).
pub const OUTPUT_TYPE: &str = "idw";

/// Sample type of the output raster.
pub const DATA_TYPE: &str = "float32";

/// Extension of the output raster.
pub const RASTER_EXTENSION: &str = "tif";

/// Point-cloud extensions replaced by the raster extension, longest first.
const POINT_CLOUD_EXTENSIONS: [&str; 4] = [".copc.laz", ".copc.las", ".laz", ".las"];

/// Which point classifications go into the raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassSelector {
    /// Only points whose classification is in the set. Never empty.
    Explicit(BTreeSet<u8>),
    /// Every point; no filter stage is emitted.
    Unfiltered,
}

impl Default for ClassSelector {
    fn default() -> Self {
        ClassSelector::Explicit(DEFAULT_CLASSES.into_iter().collect())
    }
}

impl ClassSelector {
    /// Select an explicit, non-empty set of classes.
    pub fn explicit<I: IntoIterator<Item = u8>>(codes: I) -> Result<Self> {
        let codes: BTreeSet<u8> = codes.into_iter().collect();
        if codes.is_empty() {
            return Err(PdalError::EmptyClassSelection);
        }
        Ok(ClassSelector::Explicit(codes))
    }

    /// Parse command-line tokens: class codes, or `ALL` anywhere in the list.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self> {
        if tokens
            .iter()
            .any(|t| t.as_ref().trim().eq_ignore_ascii_case(ALL_CLASSES_TOKEN))
        {
            return Ok(ClassSelector::Unfiltered);
        }

        let codes = tokens
            .iter()
            .map(|t| {
                let t = t.as_ref().trim();
                t.parse::<u8>()
                    .map_err(|_| PdalError::InvalidClassCode(t.to_string()))
            })
            .collect::<Result<Vec<u8>>>()?;
        Self::explicit(codes)
    }

    /// PDAL expression keeping the selected classes, `None` when unfiltered.
    pub fn expression(&self) -> Option<String> {
        match self {
            ClassSelector::Unfiltered => None,
            ClassSelector::Explicit(codes) => Some(
                codes
                    .iter()
                    .map(|c| format!("Classification == {}", c))
                    .collect::<Vec<_>>()
                    .join(" || "),
            ),
        }
    }
}

impl fmt::Display for ClassSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassSelector::Unfiltered => f.write_str(ALL_CLASSES_TOKEN),
            ClassSelector::Explicit(codes) => {
                let codes: Vec<String> = codes.iter().map(u8::to_string).collect();
                f.write_str(&codes.join(","))
            }
        }
    }
}

/// Options of the `writers.gdal` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GdalWriter {
    /// Output raster path.
    pub filename: PathBuf,
    /// GDAL driver name.
    pub gdaldriver: String,
    /// Interpolation method.
    pub output_type: String,
    /// Cell size in catalog units.
    pub resolution: f64,
    /// Sample type.
    pub data_type: String,
    /// Value of empty cells.
    pub nodata: i32,
}

/// A processing stage, discriminated by its `type` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Operation {
    /// Keep the points matching a boolean expression.
    #[serde(rename = "filters.expression")]
    Expression {
        /// PDAL expression.
        expression: String,
    },
    /// Rasterize the points through GDAL.
    #[serde(rename = "writers.gdal")]
    GdalWriter(GdalWriter),
}

/// One entry of the `pipeline` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stage {
    /// Input point cloud; PDAL infers the reader from the extension.
    Input(PathBuf),
    /// Filter or writer.
    Operation(Operation),
}

/// Ordered PDAL stages for rasterizing one point cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingPipelineSpec {
    stages: Vec<Stage>,
}

#[derive(Serialize)]
struct PipelineDocumentRef<'a> {
    pipeline: &'a [Stage],
}

#[derive(Deserialize)]
struct PipelineDocument {
    pipeline: Vec<Stage>,
}

impl ProcessingPipelineSpec {
    /// Stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Input point cloud.
    pub fn input(&self) -> Option<&Path> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Input(path) => Some(path.as_path()),
            _ => None,
        })
    }

    /// Classification filter expression, if the pipeline filters.
    pub fn filter_expression(&self) -> Option<&str> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Operation(Operation::Expression { expression }) => Some(expression.as_str()),
            _ => None,
        })
    }

    /// Writer stage options.
    pub fn writer(&self) -> Option<&GdalWriter> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Operation(Operation::GdalWriter(writer)) => Some(writer),
            _ => None,
        })
    }

    /// Raster the pipeline produces.
    pub fn output_path(&self) -> Option<&Path> {
        self.writer().map(|w| w.filename.as_path())
    }

    /// Serialize as a PDAL pipeline document: `{"pipeline": [...]}`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&PipelineDocumentRef {
            pipeline: &self.stages,
        })?)
    }

    /// Parse a PDAL pipeline document.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: PipelineDocument = serde_json::from_str(json)?;
        Ok(Self {
            stages: document.pipeline,
        })
    }
}

/// Raster written for `input`: same file name with the raster extension, in `output_dir`.
pub fn raster_path(input: &Path, output_dir: &Path) -> PathBuf {
    let file_name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = file_name.to_ascii_lowercase();

    let stem = POINT_CLOUD_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext) && lower.len() > ext.len())
        .map(|ext| file_name[..file_name.len() - ext.len()].to_string());

    match stem {
        Some(stem) => output_dir.join(format!("{}.{}", stem, RASTER_EXTENSION)),
        None => output_dir.join(Path::new(&file_name).with_extension(RASTER_EXTENSION)),
    }
}

/// Build the rasterization pipeline for one point cloud.
///
/// Pure: nothing is read or written.
pub fn build_pipeline(
    input: &Path,
    output_dir: &Path,
    classes: &ClassSelector,
    resolution: f64,
) -> ProcessingPipelineSpec {
    let mut stages = vec![Stage::Input(input.to_path_buf())];

    if let Some(expression) = classes.expression() {
        stages.push(Stage::Operation(Operation::Expression { expression }));
    }

    stages.push(Stage::Operation(Operation::GdalWriter(GdalWriter {
        filename: raster_path(input, output_dir),
        gdaldriver: GDAL_DRIVER.to_string(),
        output_type: OUTPUT_TYPE.to_string(),
        resolution,
        data_type: DATA_TYPE.to_string(),
        nodata: NODATA,
    })));

    ProcessingPipelineSpec { stages }
}
