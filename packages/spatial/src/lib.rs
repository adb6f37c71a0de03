#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! In-memory spatial indexes for tree placement and aggregation.
//!
//! Region polygons are parsed from their stored `GeoJSON` once, placed in
//! an R-tree keyed by bounding envelope, and answer point-in-polygon
//! lookups ([`RegionIndex`]). Tree locations live in a second R-tree that
//! answers proximity searches with haversine distance and region joins
//! ([`TreeIndex`]). Both store adapters build on these.

pub mod regions;
pub mod trees;

pub use regions::RegionIndex;
pub use trees::TreeIndex;

use geo::MultiPolygon;
use geojson::GeoJson;
use rstar::AABB;
use thiserror::Error;
use tree_map_geography_models::{BoundingBox, RegionId};

/// Errors that can occur when working with region geometry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// The region's boundary could not be turned into a usable polygon.
    #[error("Region {region_id} has an unusable boundary: {reason}")]
    DegenerateBoundary {
        /// Region primary key.
        region_id: RegionId,
        /// Why the boundary was rejected.
        reason: String,
    },

    /// The region is not present in the index.
    #[error("Region {0} is not indexed")]
    UnknownRegion(RegionId),
}

/// Parse a `GeoJSON` string into a [`MultiPolygon`].
///
/// Accepts a bare `Polygon`/`MultiPolygon` geometry or a `Feature`
/// wrapping one.
///
/// # Errors
///
/// Returns a description of the problem if the string is not `GeoJSON` or
/// does not hold polygonal geometry.
pub fn parse_geojson_to_multipolygon(geojson_str: &str) -> Result<MultiPolygon<f64>, String> {
    let geojson: GeoJson = geojson_str
        .parse()
        .map_err(|e| format!("invalid GeoJSON: {e}"))?;

    let geometry = match geojson {
        GeoJson::Geometry(geom) => geom,
        GeoJson::Feature(feature) => feature
            .geometry
            .ok_or_else(|| "feature has no geometry".to_string())?,
        GeoJson::FeatureCollection(_) => {
            return Err("expected a geometry, found a FeatureCollection".to_string());
        }
    };

    let geo_geom: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|e| format!("unsupported geometry: {e}"))?;

    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Ok(mp),
        geo::Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        _ => Err("geometry is not a Polygon or MultiPolygon".to_string()),
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
///
/// Returns `None` for an empty multipolygon.
#[must_use]
pub fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    use geo::BoundingRect;

    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

/// Converts an R-tree envelope into a [`BoundingBox`].
#[must_use]
pub fn envelope_to_bbox(envelope: &AABB<[f64; 2]>) -> BoundingBox {
    let [west, south] = envelope.lower();
    let [east, north] = envelope.upper();
    BoundingBox::new(west, south, east, north)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_polygon_as_multipolygon() {
        let mp = parse_geojson_to_multipolygon(&fixtures::square(-75.2, 39.9, 0.01)).unwrap();
        assert_eq!(mp.0.len(), 1);
    }

    #[test]
    fn parses_feature_geometry() {
        let feature = format!(
            r#"{{"type":"Feature","properties":{{}},"geometry":{}}}"#,
            fixtures::square(-75.2, 39.9, 0.01)
        );
        assert!(parse_geojson_to_multipolygon(&feature).is_ok());
    }

    #[test]
    fn rejects_non_polygon_geometry() {
        let err = parse_geojson_to_multipolygon(r#"{"type":"Point","coordinates":[-75.2,39.9]}"#)
            .unwrap_err();
        assert!(err.contains("not a Polygon"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_geojson_to_multipolygon("not json").is_err());
    }

    #[test]
    fn envelope_matches_square() {
        let mp = parse_geojson_to_multipolygon(&fixtures::square(-75.0, 40.0, 0.5)).unwrap();
        let bbox = envelope_to_bbox(&compute_envelope(&mp).unwrap());
        assert_eq!(bbox, BoundingBox::new(-75.0, 40.0, -74.5, 40.5));
    }
}
