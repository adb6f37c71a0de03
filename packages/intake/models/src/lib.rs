#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Types exchanged with the intake pipeline.
//!
//! A [`Submission`] is the raw add-a-tree form: every field is optional
//! and string-typed codes are validated later against the choice
//! registry.

use serde::{Deserialize, Serialize};
use tree_map_tree_models::Tree;
use tree_map_tree_models::events::EventKind;

/// A user-submitted new tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Submission {
    /// Street address or intersection.
    pub address_street: Option<String>,
    /// City.
    pub address_city: Option<String>,
    /// Postal code.
    pub address_zip: Option<String>,
    /// Longitude in degrees.
    #[serde(alias = "lon")]
    pub longitude: Option<f64>,
    /// Latitude in degrees.
    #[serde(alias = "lat")]
    pub latitude: Option<f64>,
    /// Species token: a species id or `"<accepted_symbol>,<cultivar>"`.
    pub species: Option<String>,
    /// Diameter at breast height in inches.
    pub dbh: Option<f64>,
    /// Total height in feet.
    pub height: Option<f64>,
    /// Height to the bottom of the canopy in feet.
    pub canopy_height: Option<f64>,
    /// Plot width in feet.
    pub plot_width: Option<i32>,
    /// Plot length in feet.
    pub plot_length: Option<i32>,
    /// Plot type code.
    pub plot_type: Option<String>,
    /// Whether power lines are overhead.
    pub power_lines: Option<bool>,
    /// Sidewalk damage code.
    pub sidewalk_damage: Option<String>,
    /// Overall condition code.
    pub condition: Option<String>,
    /// Canopy condition code.
    pub canopy_condition: Option<String>,
    /// Maintenance action code.
    pub action: Option<String>,
    /// Alert category code.
    pub alert: Option<String>,
}

/// A non-fatal problem encountered after the tree was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntakeWarning {
    /// One observation event could not be written. The tree and the other
    /// events were kept.
    PartialEventWriteFailure {
        /// Kind of the failed event.
        kind: EventKind,
        /// Event key (status name, alert or action code).
        key: String,
        /// Why the write failed.
        reason: String,
    },
}

impl std::fmt::Display for IntakeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PartialEventWriteFailure { kind, key, reason } => {
                write!(f, "{kind} event {key:?} was not recorded: {reason}")
            }
        }
    }
}

/// The result of a successful intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeOutcome {
    /// The persisted tree.
    pub tree: Tree,
    /// Problems that did not prevent the tree from being saved.
    pub warnings: Vec<IntakeWarning>,
}

impl IntakeOutcome {
    /// Whether every event was written.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
