#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region boundary and bounding box types.
//!
//! Regions are named polygons (neighborhoods, zip codes) used to group
//! trees geographically. They are reference data: loaded from the store,
//! never created by intake or aggregation.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Primary key of a [`Region`]. Unique across all region kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub i64);

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The administrative layer a region belongs to.
///
/// Regions of different kinds overlap by design: a tree is usually in one
/// neighborhood and one zip code at the same time.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegionKind {
    /// City neighborhood.
    Neighborhood,
    /// Postal zone.
    ZipCode,
}

/// A named region polygon as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Primary key.
    pub id: RegionId,
    /// Administrative layer.
    pub kind: RegionKind,
    /// Human-readable name (e.g. "Fishtown", "19125").
    pub name: String,
    /// `GeoJSON` `Polygon` or `MultiPolygon` geometry.
    pub boundary_geojson: String,
}

impl Region {
    /// Returns the lightweight reference to this region.
    #[must_use]
    pub fn to_ref(&self) -> RegionRef {
        RegionRef {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}

/// A region without its geometry, as reported by containment lookups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionRef {
    /// Primary key.
    pub id: RegionId,
    /// Administrative layer.
    pub kind: RegionKind,
    /// Human-readable name.
    pub name: String,
}

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Creates a degenerate bounding box covering a single point.
    #[must_use]
    pub const fn from_point(longitude: f64, latitude: f64) -> Self {
        Self::new(longitude, latitude, longitude, latitude)
    }

    /// Grows this box to cover the given point.
    #[must_use]
    pub fn including(self, longitude: f64, latitude: f64) -> Self {
        Self::new(
            self.west.min(longitude),
            self.south.min(latitude),
            self.east.max(longitude),
            self.north.max(latitude),
        )
    }

    /// Whether the two boxes share any point (edges included).
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn region_kind_names() {
        assert_eq!(RegionKind::ZipCode.to_string(), "zip_code");
        assert_eq!(
            RegionKind::from_str("neighborhood").unwrap(),
            RegionKind::Neighborhood
        );
        assert!(RegionKind::from_str("county").is_err());
    }

    #[test]
    fn bounding_box_grows_to_include_points() {
        let bbox = BoundingBox::from_point(-75.0, 40.0)
            .including(-75.2, 39.9)
            .including(-74.9, 40.1);
        assert_eq!(bbox, BoundingBox::new(-75.2, 39.9, -74.9, 40.1));
    }

    #[test]
    fn bounding_box_intersection() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let touching = BoundingBox::new(1.0, 1.0, 2.0, 2.0);
        let disjoint = BoundingBox::new(1.5, 1.5, 2.0, 2.0);
        assert!(a.intersects(&touching));
        assert!(touching.intersects(&a));
        assert!(!a.intersects(&disjoint));
    }
}
