#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Tree inventory types shared across the tree map workspace.
//!
//! Defines the point-located [`Tree`] record, the canonical [`Species`]
//! reference, provenance markers ([`ImportEvent`]), and the append-only
//! observation events recorded against a tree (see [`events`]).

pub mod events;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Primary key of a [`Tree`].
    TreeId
);
id_type!(
    /// Primary key of a [`Species`].
    SpeciesId
);
id_type!(
    /// Primary key of an [`ImportEvent`].
    ImportEventId
);
id_type!(
    /// Opaque reference to the user submitting or reporting data. Carried
    /// through, never validated.
    ActorId
);

/// A WGS84 longitude/latitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Longitude in degrees, -180 to 180.
    pub longitude: f64,
    /// Latitude in degrees, -90 to 90.
    pub latitude: f64,
}

impl Coordinate {
    /// Builds a coordinate from optional components.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCoordinateError`] if either component is missing,
    /// not finite, or outside the valid WGS84 range.
    pub fn try_new(
        longitude: Option<f64>,
        latitude: Option<f64>,
    ) -> Result<Self, InvalidCoordinateError> {
        let (Some(longitude), Some(latitude)) = (longitude, latitude) else {
            return Err(InvalidCoordinateError::Missing);
        };

        if !longitude.is_finite()
            || !latitude.is_finite()
            || !(-180.0..=180.0).contains(&longitude)
            || !(-90.0..=90.0).contains(&latitude)
        {
            return Err(InvalidCoordinateError::OutOfRange {
                longitude,
                latitude,
            });
        }

        Ok(Self {
            longitude,
            latitude,
        })
    }
}

/// Error returned when a [`Coordinate`] cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvalidCoordinateError {
    /// Longitude or latitude was not supplied.
    Missing,
    /// The supplied values are not a valid WGS84 position.
    OutOfRange {
        /// Supplied longitude.
        longitude: f64,
        /// Supplied latitude.
        latitude: f64,
    },
}

impl std::fmt::Display for InvalidCoordinateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "tree is missing a location"),
            Self::OutOfRange {
                longitude,
                latitude,
            } => write!(
                f,
                "coordinate ({longitude}, {latitude}) is not a valid WGS84 position"
            ),
        }
    }
}

impl std::error::Error for InvalidCoordinateError {}

/// Canonical botanical reference.
///
/// Several rows may share an `accepted_symbol` and differ only by
/// `cultivar_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Species {
    /// Primary key.
    pub id: SpeciesId,
    /// USDA plants symbol of this row.
    pub symbol: String,
    /// Accepted USDA plants symbol (e.g. `"QUAL"`).
    pub accepted_symbol: String,
    /// Cultivar name, if this row describes a cultivar.
    pub cultivar_name: Option<String>,
    /// Scientific name (e.g. "Quercus alba").
    pub scientific_name: String,
    /// Common name (e.g. "white oak").
    pub common_name: Option<String>,
}

/// A named provenance marker grouping trees created through the same
/// intake channel or import batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEvent {
    /// Primary key.
    pub id: ImportEventId,
    /// Channel or batch name (e.g. `"site_add"`).
    pub name: String,
}

/// The attributes of a tree before it has been persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTree {
    /// Location of the tree. `None` only while the record is being built.
    pub coordinate: Option<Coordinate>,
    /// Street address as entered.
    pub address_street: Option<String>,
    /// City as entered.
    pub address_city: Option<String>,
    /// Postal code as entered.
    pub address_zip: Option<String>,
    /// Mirror of the street address used for geocoding lookups.
    pub geocoded_address: Option<String>,
    /// Resolved species.
    pub species_id: Option<SpeciesId>,
    /// Plot width in feet.
    pub plot_width: Option<i32>,
    /// Plot length in feet.
    pub plot_length: Option<i32>,
    /// Plot type code from the `plot` choice list.
    pub plot_type: Option<String>,
    /// Whether power lines are overhead.
    pub powerline_conflict_potential: Option<bool>,
    /// Provenance batch.
    pub import_event_id: Option<ImportEventId>,
    /// Actor that last updated this tree.
    pub last_updated_by: Option<ActorId>,
}

/// A persisted, point-located tree record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    /// Primary key.
    pub id: TreeId,
    /// Location of the tree.
    pub coordinate: Coordinate,
    /// Street address as entered.
    pub address_street: Option<String>,
    /// City as entered.
    pub address_city: Option<String>,
    /// Postal code as entered.
    pub address_zip: Option<String>,
    /// Mirror of the street address used for geocoding lookups.
    pub geocoded_address: Option<String>,
    /// Resolved species.
    pub species_id: Option<SpeciesId>,
    /// Plot width in feet.
    pub plot_width: Option<i32>,
    /// Plot length in feet.
    pub plot_length: Option<i32>,
    /// Plot type code from the `plot` choice list.
    pub plot_type: Option<String>,
    /// Whether power lines are overhead.
    pub powerline_conflict_potential: Option<bool>,
    /// Provenance batch.
    pub import_event_id: Option<ImportEventId>,
    /// Actor that last updated this tree.
    pub last_updated_by: Option<ActorId>,
}

impl Tree {
    /// Assigns an identity to a [`NewTree`].
    ///
    /// Returns `None` if the new tree has no coordinate.
    #[must_use]
    pub fn from_new(id: TreeId, new: NewTree) -> Option<Self> {
        Some(Self {
            id,
            coordinate: new.coordinate?,
            address_street: new.address_street,
            address_city: new.address_city,
            address_zip: new.address_zip,
            geocoded_address: new.geocoded_address,
            species_id: new.species_id,
            plot_width: new.plot_width,
            plot_length: new.plot_length,
            plot_type: new.plot_type,
            powerline_conflict_potential: new.powerline_conflict_potential,
            import_event_id: new.import_event_id,
            last_updated_by: new.last_updated_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_requires_both_components() {
        assert_eq!(
            Coordinate::try_new(None, Some(39.95)),
            Err(InvalidCoordinateError::Missing)
        );
        assert_eq!(
            Coordinate::try_new(Some(-75.16), None),
            Err(InvalidCoordinateError::Missing)
        );
    }

    #[test]
    fn coordinate_rejects_out_of_range() {
        assert!(Coordinate::try_new(Some(-200.0), Some(39.95)).is_err());
        assert!(Coordinate::try_new(Some(-75.16), Some(91.0)).is_err());
        assert!(Coordinate::try_new(Some(f64::NAN), Some(39.95)).is_err());
    }

    #[test]
    fn coordinate_accepts_valid_position() {
        let coord = Coordinate::try_new(Some(-75.16), Some(39.95)).unwrap();
        assert!((coord.longitude - -75.16).abs() < f64::EPSILON);
        assert!((coord.latitude - 39.95).abs() < f64::EPSILON);
    }

    #[test]
    fn tree_from_new_requires_coordinate() {
        assert!(Tree::from_new(TreeId(1), NewTree::default()).is_none());

        let new = NewTree {
            coordinate: Some(Coordinate {
                longitude: -75.16,
                latitude: 39.95,
            }),
            address_street: Some("100 Market St".to_string()),
            ..NewTree::default()
        };
        let tree = Tree::from_new(TreeId(7), new).unwrap();
        assert_eq!(tree.id, TreeId(7));
        assert_eq!(tree.address_street.as_deref(), Some("100 Market St"));
    }

    #[test]
    fn ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&TreeId(42)).unwrap(), "42");
        assert_eq!(TreeId(42).to_string(), "42");
    }
}
