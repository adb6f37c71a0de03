//! Tree location index.
//!
//! Proximity searches use true great-circle (haversine) distance. The
//! R-tree lookup only narrows candidates to a degree-space envelope sized
//! generously around the search radius.

use geo::{Distance as _, Haversine, Point};
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};
use tree_map_geography_models::{BoundingBox, RegionId};
use tree_map_tree_models::{Coordinate, TreeId};

use crate::{GeometryError, RegionIndex};

/// Approximate meters per degree of latitude (mean earth radius).
const METERS_PER_DEGREE: f64 = 111_195.0;

/// Multiplier applied to the candidate envelope so rounding never drops a
/// tree that is within the radius.
const ENVELOPE_PADDING: f64 = 1.5;

type TreePoint = GeomWithData<[f64; 2], TreeId>;

/// Spatial index over tree locations.
#[derive(Default)]
pub struct TreeIndex {
    rtree: RTree<TreePoint>,
}

impl TreeIndex {
    /// Bulk-loads an index from `(id, coordinate)` pairs.
    #[must_use]
    pub fn build(trees: impl IntoIterator<Item = (TreeId, Coordinate)>) -> Self {
        let points = trees
            .into_iter()
            .map(|(id, coord)| TreePoint::new([coord.longitude, coord.latitude], id))
            .collect();

        Self {
            rtree: RTree::bulk_load(points),
        }
    }

    /// Adds one tree.
    pub fn insert(&mut self, id: TreeId, coordinate: Coordinate) {
        self.rtree
            .insert(TreePoint::new([coordinate.longitude, coordinate.latitude], id));
    }

    /// Number of indexed trees.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rtree.size()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rtree.size() == 0
    }

    /// Trees whose haversine distance from `center` is at most
    /// `radius_meters` (the boundary is inclusive), sorted by id.
    #[must_use]
    pub fn within_distance(&self, center: Coordinate, radius_meters: f64) -> Vec<TreeId> {
        if !radius_meters.is_finite() || radius_meters < 0.0 {
            return Vec::new();
        }

        let origin = Point::new(center.longitude, center.latitude);
        let lat_delta = radius_meters / METERS_PER_DEGREE * ENVELOPE_PADDING;
        let lon_delta = lat_delta / center.latitude.to_radians().cos().abs().max(1e-6);

        let query_env = AABB::from_corners(
            [center.longitude - lon_delta, center.latitude - lat_delta],
            [center.longitude + lon_delta, center.latitude + lat_delta],
        );

        let mut found: Vec<TreeId> = self
            .rtree
            .locate_in_envelope(&query_env)
            .filter(|candidate| {
                let [lng, lat] = *candidate.geom();
                Haversine.distance(origin, Point::new(lng, lat)) <= radius_meters
            })
            .map(|candidate| candidate.data)
            .collect();

        found.sort();
        found
    }

    /// Trees whose location lies inside the region's polygon, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the region's boundary was rejected or
    /// the region is unknown.
    pub fn within_region(
        &self,
        regions: &RegionIndex,
        region_id: RegionId,
    ) -> Result<Vec<TreeId>, GeometryError> {
        let envelope = regions.envelope(region_id)?;

        let mut found = Vec::new();
        for candidate in self.rtree.locate_in_envelope(&envelope) {
            let [lng, lat] = *candidate.geom();
            if regions.contains(region_id, lng, lat)? {
                found.push(candidate.data);
            }
        }

        found.sort();
        Ok(found)
    }

    /// The bounding box of every indexed tree, or `None` when empty.
    #[must_use]
    pub fn envelope(&self) -> Option<BoundingBox> {
        self.rtree.iter().fold(None, |acc, point| {
            let [lng, lat] = *point.geom();
            Some(match acc {
                None => BoundingBox::from_point(lng, lat),
                Some(bbox) => bbox.including(lng, lat),
            })
        })
    }
}
