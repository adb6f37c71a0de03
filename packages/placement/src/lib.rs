#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Placement validation for new trees.
//!
//! A placement is accepted when the coordinate is a valid WGS84 position
//! inside at least one region of the configured kind and, if the
//! proximity check is enabled, no existing tree is within the configured
//! radius. Validation only reads from the store.

use thiserror::Error;
use tree_map_config::PlacementConfig;
use tree_map_database::{GeometryStore, StoreError};
use tree_map_geography_models::{RegionKind, RegionRef};
use tree_map_tree_models::{Coordinate, InvalidCoordinateError, TreeId};

/// Errors that can occur while validating a placement.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The coordinate is missing or not a valid position.
    #[error("Invalid location: {0}")]
    InvalidGeometry(#[from] InvalidCoordinateError),

    /// No region of the required kind contains the point.
    #[error("The selected location is outside every {kind} in the service area")]
    OutOfArea {
        /// Region kind that was checked.
        kind: RegionKind,
    },

    /// Existing trees are within the proximity radius.
    #[error("The selected location is within {radius_feet} ft of {} existing tree(s)", .nearby.len())]
    TooClose {
        /// Offending trees, ascending by id.
        nearby: Vec<TreeId>,
        /// Radius that was applied, in feet.
        radius_feet: f64,
    },

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An accepted placement.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    /// The validated coordinate.
    pub coordinate: Coordinate,
    /// Every containing region of the configured kind, ascending by id.
    pub regions: Vec<RegionRef>,
}

/// Validates proposed tree locations.
pub struct PlacementValidator<'a, S: GeometryStore + ?Sized> {
    store: &'a S,
    config: &'a PlacementConfig,
}

impl<'a, S: GeometryStore + ?Sized> PlacementValidator<'a, S> {
    /// Creates a validator reading from `store`.
    #[must_use]
    pub const fn new(store: &'a S, config: &'a PlacementConfig) -> Self {
        Self { store, config }
    }

    /// Validates a proposed location.
    ///
    /// # Errors
    ///
    /// * [`PlacementError::InvalidGeometry`] if a component is missing or
    ///   out of range
    /// * [`PlacementError::OutOfArea`] if no region contains the point
    /// * [`PlacementError::TooClose`] if the proximity check is enabled
    ///   and an existing tree is within the radius
    /// * [`PlacementError::Store`] if a lookup fails
    pub async fn validate(
        &self,
        longitude: Option<f64>,
        latitude: Option<f64>,
    ) -> Result<Placement, PlacementError> {
        let coordinate = Coordinate::try_new(longitude, latitude)?;
        let kind = self.config.region_kind;

        let regions = self.store.containing_regions(coordinate, kind).await?;
        if regions.is_empty() {
            log::debug!(
                "Rejecting ({}, {}): outside every {kind}",
                coordinate.longitude,
                coordinate.latitude
            );
            return Err(PlacementError::OutOfArea { kind });
        }

        if self.config.proximity_check {
            let nearby: Vec<TreeId> = self
                .store
                .trees_within(coordinate, self.config.proximity_radius_meters())
                .await?
                .into_iter()
                .map(|tree| tree.id)
                .collect();

            if !nearby.is_empty() {
                return Err(PlacementError::TooClose {
                    nearby,
                    radius_feet: self.config.proximity_radius_feet,
                });
            }
        }

        Ok(Placement {
            coordinate,
            regions,
        })
    }
}

#[cfg(test)]
mod tests {
    use tree_map_database::MemoryStore;
    use tree_map_geography_models::{Region, RegionId};
    use tree_map_tree_models::Tree;

    use super::*;

    fn square(west: f64, south: f64, size: f64) -> String {
        let (east, north) = (west + size, south + size);
        format!(
            r#"{{"type":"Polygon","coordinates":[[[{west},{south}],[{east},{south}],[{east},{north}],[{west},{north}],[{west},{south}]]]}}"#
        )
    }

    fn region(id: i64, kind: RegionKind, name: &str, boundary_geojson: String) -> Region {
        Region {
            id: RegionId(id),
            kind,
            name: name.to_string(),
            boundary_geojson,
        }
    }

    fn tree(id: i64, longitude: f64, latitude: f64) -> Tree {
        Tree {
            id: TreeId(id),
            coordinate: Coordinate {
                longitude,
                latitude,
            },
            address_street: None,
            address_city: None,
            address_zip: None,
            geocoded_address: None,
            species_id: None,
            plot_width: None,
            plot_length: None,
            plot_type: None,
            powerline_conflict_potential: None,
            import_event_id: None,
            last_updated_by: None,
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_regions([
                region(1, RegionKind::Neighborhood, "Fishtown", square(-75.2, 39.9, 0.1)),
                region(2, RegionKind::Neighborhood, "Kensington", square(-75.1, 39.9, 0.1)),
                region(3, RegionKind::ZipCode, "19125", square(-75.2, 39.9, 0.2)),
            ])
            .with_trees([tree(10, -75.15, 39.95)])
    }

    fn config(proximity_check: bool, proximity_radius_feet: f64) -> PlacementConfig {
        PlacementConfig {
            region_kind: RegionKind::Neighborhood,
            proximity_check,
            proximity_radius_feet,
        }
    }

    #[tokio::test]
    async fn missing_component_is_invalid_geometry() {
        let store = store();
        let config = config(false, 10.0);
        let validator = PlacementValidator::new(&store, &config);
        assert!(matches!(
            validator.validate(None, Some(39.95)).await,
            Err(PlacementError::InvalidGeometry(InvalidCoordinateError::Missing))
        ));
        assert!(matches!(
            validator.validate(Some(-75.15), Some(120.0)).await,
            Err(PlacementError::InvalidGeometry(_))
        ));
    }

    #[tokio::test]
    async fn outside_every_region_is_out_of_area() {
        let store = store();
        let config = config(false, 10.0);
        let validator = PlacementValidator::new(&store, &config);
        assert!(matches!(
            validator.validate(Some(-80.0), Some(35.0)).await,
            Err(PlacementError::OutOfArea {
                kind: RegionKind::Neighborhood
            })
        ));
    }

    #[tokio::test]
    async fn inside_one_region_lists_it() {
        let store = store();
        let config = config(false, 10.0);
        let validator = PlacementValidator::new(&store, &config);

        let placement = validator.validate(Some(-75.05), Some(39.95)).await.unwrap();
        assert_eq!(placement.regions.len(), 1);
        assert_eq!(placement.regions[0].name, "Kensington");
    }

    #[tokio::test]
    async fn only_configured_kind_counts() {
        let store = store();
        let mut config = config(false, 10.0);
        config.region_kind = RegionKind::ZipCode;
        let validator = PlacementValidator::new(&store, &config);

        let placement = validator.validate(Some(-75.05), Some(39.95)).await.unwrap();
        assert_eq!(placement.regions[0].id, RegionId(3));
    }

    #[tokio::test]
    async fn nearby_tree_is_too_close_when_enabled() {
        let store = store();

        // ~2.2 m north of tree 10.
        let lenient = config(false, 10.0);
        let validator = PlacementValidator::new(&store, &lenient);
        assert!(validator.validate(Some(-75.15), Some(39.95002)).await.is_ok());

        let strict = config(true, 10.0);
        let validator = PlacementValidator::new(&store, &strict);
        match validator.validate(Some(-75.15), Some(39.95002)).await {
            Err(PlacementError::TooClose { nearby, .. }) => assert_eq!(nearby, vec![TreeId(10)]),
            other => panic!("expected TooClose, got {other:?}"),
        }

        // ~11 m away is fine.
        assert!(validator.validate(Some(-75.15), Some(39.9501)).await.is_ok());
    }

    #[tokio::test]
    async fn radius_is_inclusive() {
        // A zero radius still rejects a tree at exactly the same spot.
        let store = store();
        let config = config(true, 0.0);
        let validator = PlacementValidator::new(&store, &config);
        assert!(matches!(
            validator.validate(Some(-75.15), Some(39.95)).await,
            Err(PlacementError::TooClose { .. })
        ));
    }
}
