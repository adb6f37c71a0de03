//! Region boundary index.
//!
//! Regions of every kind share one R-tree. Overlap between kinds is
//! expected, so lookups filter by kind and return every match instead of
//! picking a single winner.

use std::collections::BTreeMap;
use std::sync::Arc;

use geo::{Area as _, Contains as _, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};
use tree_map_geography_models::{BoundingBox, Region, RegionId, RegionKind, RegionRef};

use crate::{GeometryError, compute_envelope, envelope_to_bbox, parse_geojson_to_multipolygon};

/// A parsed region polygon with its metadata.
struct Boundary {
    region: RegionRef,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

/// R-tree handle to a shared [`Boundary`].
struct BoundaryEntry(Arc<Boundary>);

impl RTreeObject for BoundaryEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.0.envelope
    }
}

/// Pre-built spatial index over region polygons.
///
/// Boundaries that fail to parse, or that enclose no area, are kept aside
/// with the reason they were rejected so that callers can report them per
/// region instead of failing a whole batch.
#[derive(Default)]
pub struct RegionIndex {
    rtree: RTree<BoundaryEntry>,
    by_id: BTreeMap<RegionId, Arc<Boundary>>,
    rejected: BTreeMap<RegionId, String>,
}

impl RegionIndex {
    /// Parses every region boundary and bulk-loads the valid ones.
    #[must_use]
    pub fn build(regions: &[Region]) -> Self {
        let mut by_id = BTreeMap::new();
        let mut rejected = BTreeMap::new();

        for region in regions {
            match parse_boundary(region) {
                Ok(boundary) => {
                    by_id.insert(region.id, Arc::new(boundary));
                }
                Err(reason) => {
                    log::warn!(
                        "Rejecting boundary for {} {} ({}): {reason}",
                        region.kind,
                        region.id,
                        region.name
                    );
                    rejected.insert(region.id, reason);
                }
            }
        }

        let entries = by_id
            .values()
            .map(|boundary| BoundaryEntry(Arc::clone(boundary)))
            .collect();

        let index = Self {
            rtree: RTree::bulk_load(entries),
            by_id,
            rejected,
        };

        log::debug!(
            "Indexed {} region boundaries ({} rejected)",
            index.len(),
            index.rejected.len()
        );

        index
    }

    /// Number of usable boundaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no usable boundaries were indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Every region of `kind` whose polygon contains the point, sorted by
    /// region id. Points on a polygon's edge are not contained.
    #[must_use]
    pub fn containing(&self, longitude: f64, latitude: f64, kind: RegionKind) -> Vec<RegionRef> {
        let point = geo::Point::new(longitude, latitude);
        let query_env = AABB::from_point([longitude, latitude]);

        let mut found: Vec<RegionRef> = self
            .rtree
            .locate_in_envelope_intersecting(&query_env)
            .map(|entry| &entry.0)
            .filter(|boundary| boundary.region.kind == kind)
            .filter(|boundary| boundary.polygon.contains(&point))
            .map(|boundary| boundary.region.clone())
            .collect();

        found.sort();
        found
    }

    /// Whether the region's polygon contains the point.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the region's boundary was rejected or
    /// the region is unknown.
    pub fn contains(
        &self,
        region_id: RegionId,
        longitude: f64,
        latitude: f64,
    ) -> Result<bool, GeometryError> {
        let boundary = self.boundary(region_id)?;
        Ok(boundary
            .polygon
            .contains(&geo::Point::new(longitude, latitude)))
    }

    /// The bounding box of a region's polygon.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the region's boundary was rejected or
    /// the region is unknown.
    pub fn bounding_box(&self, region_id: RegionId) -> Result<BoundingBox, GeometryError> {
        Ok(envelope_to_bbox(&self.boundary(region_id)?.envelope))
    }

    pub(crate) fn envelope(&self, region_id: RegionId) -> Result<AABB<[f64; 2]>, GeometryError> {
        Ok(self.boundary(region_id)?.envelope)
    }

    fn boundary(&self, region_id: RegionId) -> Result<&Boundary, GeometryError> {
        if let Some(boundary) = self.by_id.get(&region_id) {
            return Ok(boundary);
        }

        Err(self.rejected.get(&region_id).map_or(
            GeometryError::UnknownRegion(region_id),
            |reason| GeometryError::DegenerateBoundary {
                region_id,
                reason: reason.clone(),
            },
        ))
    }
}

fn parse_boundary(region: &Region) -> Result<Boundary, String> {
    if region.boundary_geojson.trim().is_empty() {
        return Err("boundary is empty".to_string());
    }

    let polygon = parse_geojson_to_multipolygon(&region.boundary_geojson)?;

    if polygon.unsigned_area() <= 0.0 {
        return Err("boundary encloses no area".to_string());
    }

    let envelope =
        compute_envelope(&polygon).ok_or_else(|| "boundary has no extent".to_string())?;

    Ok(Boundary {
        region: region.to_ref(),
        envelope,
        polygon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::square;

    fn region(id: i64, kind: RegionKind, name: &str, boundary_geojson: String) -> Region {
        Region {
            id: RegionId(id),
            kind,
            name: name.to_string(),
            boundary_geojson,
        }
    }

    fn sample_index() -> RegionIndex {
        RegionIndex::build(&[
            region(1, RegionKind::Neighborhood, "West", square(-75.2, 39.9, 0.1)),
            region(2, RegionKind::Neighborhood, "East", square(-75.1, 39.9, 0.1)),
            region(3, RegionKind::ZipCode, "19100", square(-75.2, 39.9, 0.2)),
            region(4, RegionKind::Neighborhood, "Broken", "{".to_string()),
            region(
                5,
                RegionKind::Neighborhood,
                "Flat",
                square(-76.0, 39.0, 0.0),
            ),
        ])
    }

    #[test]
    fn rejects_unparseable_and_flat_boundaries() {
        let index = sample_index();
        assert_eq!(index.len(), 3);
        assert!(matches!(
            index.contains(RegionId(4), -75.0, 39.0),
            Err(GeometryError::DegenerateBoundary { .. })
        ));
        assert!(matches!(
            index.bounding_box(RegionId(5)),
            Err(GeometryError::DegenerateBoundary { .. })
        ));
        assert_eq!(
            index.contains(RegionId(99), -75.0, 39.0),
            Err(GeometryError::UnknownRegion(RegionId(99)))
        );
    }

    #[test]
    fn containing_filters_by_kind() {
        let index = sample_index();

        let nbhds = index.containing(-75.15, 39.95, RegionKind::Neighborhood);
        assert_eq!(nbhds.len(), 1);
        assert_eq!(nbhds[0].name, "West");

        let zips = index.containing(-75.15, 39.95, RegionKind::ZipCode);
        assert_eq!(zips.len(), 1);
        assert_eq!(zips[0].id, RegionId(3));
    }

    #[test]
    fn outside_every_region_is_empty() {
        let index = sample_index();
        assert!(
            index
                .containing(-80.0, 35.0, RegionKind::Neighborhood)
                .is_empty()
        );
    }

    #[test]
    fn overlapping_regions_are_all_reported() {
        let index = RegionIndex::build(&[
            region(7, RegionKind::Neighborhood, "Big", square(-75.2, 39.9, 0.2)),
            region(6, RegionKind::Neighborhood, "Small", square(-75.15, 39.95, 0.01)),
        ]);
        let found = index.containing(-75.145, 39.955, RegionKind::Neighborhood);
        let ids: Vec<RegionId> = found.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RegionId(6), RegionId(7)]);
    }

    #[test]
    fn contains_checks_single_region() {
        let index = sample_index();
        assert_eq!(index.contains(RegionId(2), -75.05, 39.95), Ok(true));
        assert_eq!(index.contains(RegionId(1), -75.05, 39.95), Ok(false));
    }
}
