//! Spatial join between a user region and the tile catalog.

use crate::catalog::{rect_to_aabb, TileIndex, UserRegion};
use geo::{BoundingRect, Intersects};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Unique download URLs of the tiles intersecting a region.
///
/// Iterates in lexicographic order so repeated runs download in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    urls: BTreeSet<String>,
}

impl MatchSet {
    /// Build a match set from URLs, dropping duplicates.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of unique URLs.
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Whether no tile matched.
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Whether `url` is part of the set.
    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Iterate over the URLs in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.urls.iter().map(String::as_str)
    }
}

impl<'a> IntoIterator for &'a MatchSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.urls.iter()
    }
}

/// Find the download URLs of every catalog tile intersecting the region.
///
/// Inner-join semantics: a tile contributes when at least one region geometry
/// intersects its footprint. Several tiles sharing a URL contribute it once.
/// An empty region or catalog yields an empty set.
pub fn match_tiles(region: &UserRegion, index: &TileIndex) -> MatchSet {
    let mut urls = BTreeSet::new();

    for geometry in region.geometries() {
        let Some(rect) = geometry.bounding_rect() else {
            continue;
        };

        for record in index.candidates(&rect_to_aabb(rect)) {
            if !urls.contains(record.url()) && geometry.intersects(record.geometry()) {
                debug!(url = record.url(), "tile intersects region");
                urls.insert(record.url().to_string());
            }
        }
    }

    info!(
        region_geometries = region.geometries().len(),
        catalog_tiles = index.len(),
        matched = urls.len(),
        "matched region against tile catalog"
    );

    MatchSet { urls }
}
