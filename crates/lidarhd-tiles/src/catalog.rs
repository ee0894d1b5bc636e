//! Tile catalog and user region loading.
//!
//! The catalog is the provider's static index of point-cloud tiles: one polygon
//! footprint per tile plus the URL the tile is downloaded from. It is loaded once
//! and never mutated; the matcher receives it by reference.
//!
//! Both the catalog and the user region are read from ESRI shapefiles. No
//! reprojection happens here: the region must already be expressed in the
//! catalog's reference frame (Lambert-93 for LiDAR HD).

use crate::{Result, TilesError};
use geo::{BoundingRect, Geometry, Rect};
use rstar::{RTree, RTreeObject, AABB};
use shapefile::dbase::{FieldValue, Record};
use shapefile::Shape;
use std::path::Path;
use tracing::{debug, warn};

/// Default name of the catalog attribute that holds the download URL.
pub const DEFAULT_URL_FIELD: &str = "url_telech";

/// A single catalog entry: coverage footprint plus download URL.
#[derive(Debug, Clone)]
pub struct TileRecord {
    geometry: Geometry<f64>,
    url: String,
}

impl TileRecord {
    /// Create a tile record.
    pub fn new(geometry: impl Into<Geometry<f64>>, url: impl Into<String>) -> Self {
        Self {
            geometry: geometry.into(),
            url: url.into(),
        }
    }

    /// Coverage footprint of the tile.
    pub fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    /// Download URL of the tile.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Bounding box of one catalog record, stored in the R-tree.
#[derive(Debug, Clone)]
struct TileEnvelope {
    /// Position of the record in `TileIndex::records`.
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for TileEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub(crate) fn rect_to_aabb(rect: Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// Immutable tile catalog with a spatial index over tile footprints.
#[derive(Debug)]
pub struct TileIndex {
    records: Vec<TileRecord>,
    tree: RTree<TileEnvelope>,
}

impl TileIndex {
    /// Build an index from already loaded records.
    pub fn new(records: Vec<TileRecord>) -> Self {
        let envelopes = records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record.geometry.bounding_rect().map(|rect| TileEnvelope {
                    index,
                    aabb: rect_to_aabb(rect),
                })
            })
            .collect();

        Self {
            records,
            tree: RTree::bulk_load(envelopes),
        }
    }

    /// Load the catalog from a shapefile.
    ///
    /// Every non-null shape must carry a character attribute named `url_field`.
    /// Null shapes are skipped with a warning.
    pub fn from_shapefile<P: AsRef<Path>>(path: P, url_field: &str) -> Result<Self> {
        let path = path.as_ref();
        let mut reader =
            shapefile::Reader::from_path(path).map_err(|source| TilesError::Shapefile {
                path: path.to_path_buf(),
                source,
            })?;

        let mut records = Vec::new();
        for (number, item) in reader.iter_shapes_and_records().enumerate() {
            let (shape, record) = item.map_err(|source| TilesError::Shapefile {
                path: path.to_path_buf(),
                source,
            })?;

            let Some(geometry) = shape_to_geometry(shape, path, number)? else {
                continue;
            };

            let url = url_attribute(&record, url_field).ok_or_else(|| {
                TilesError::MissingUrlField {
                    path: path.to_path_buf(),
                    record: number,
                    field: url_field.to_string(),
                }
            })?;

            records.push(TileRecord::new(geometry, url));
        }

        debug!(path = %path.display(), tiles = records.len(), "loaded tile catalog");
        Ok(Self::new(records))
    }

    /// All catalog records.
    pub fn records(&self) -> &[TileRecord] {
        &self.records
    }

    /// Number of catalog records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records whose footprint bounding box intersects `envelope`.
    pub(crate) fn candidates<'a>(
        &'a self,
        envelope: &AABB<[f64; 2]>,
    ) -> impl Iterator<Item = &'a TileRecord> + 'a {
        self.tree
            .locate_in_envelope_intersecting(envelope)
            .map(move |entry| &self.records[entry.index])
    }
}

/// The caller's area of interest: one or more geometries.
#[derive(Debug, Clone, Default)]
pub struct UserRegion {
    geometries: Vec<Geometry<f64>>,
}

impl UserRegion {
    /// Create a region from geometries.
    pub fn new(geometries: Vec<Geometry<f64>>) -> Self {
        Self { geometries }
    }

    /// Load the region from a shapefile. Null shapes are skipped.
    pub fn from_shapefile<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let shapes = shapefile::read_shapes(path).map_err(|source| TilesError::Shapefile {
            path: path.to_path_buf(),
            source,
        })?;

        let mut geometries = Vec::with_capacity(shapes.len());
        for (number, shape) in shapes.into_iter().enumerate() {
            if let Some(geometry) = shape_to_geometry(shape, path, number)? {
                geometries.push(geometry);
            }
        }

        debug!(path = %path.display(), geometries = geometries.len(), "loaded user region");
        Ok(Self { geometries })
    }

    /// Region geometries.
    pub fn geometries(&self) -> &[Geometry<f64>] {
        &self.geometries
    }

    /// Whether the region has no geometry at all.
    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }
}

fn shape_to_geometry(shape: Shape, path: &Path, record: usize) -> Result<Option<Geometry<f64>>> {
    if matches!(shape, Shape::NullShape) {
        warn!(path = %path.display(), record, "skipping null shape");
        return Ok(None);
    }

    Geometry::<f64>::try_from(shape)
        .map(Some)
        .map_err(|e| TilesError::InvalidGeometry {
            path: path.to_path_buf(),
            record,
            reason: e.to_string(),
        })
}

fn url_attribute(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        FieldValue::Character(Some(value)) => Some(value.trim().to_string()),
        FieldValue::Memo(value) => Some(value.trim().to_string()),
        _ => None,
    }
    .filter(|url| !url.is_empty())
}
