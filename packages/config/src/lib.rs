#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Runtime configuration for the tree map toolchain.
//!
//! Defaults are TOML files embedded at compile time. A caller may overlay
//! a TOML file of its own (only the keys it sets are replaced) and then
//! environment variables:
//!
//! | Variable                   | Setting                            |
//! |----------------------------|------------------------------------|
//! | `TREE_MAP_DB`              | `database.path`                    |
//! | `TREE_MAP_REGION_KIND`     | `placement.region_kind`            |
//! | `TREE_MAP_PROXIMITY_CHECK` | `placement.proximity_check`        |
//! | `TREE_MAP_PROXIMITY_FEET`  | `placement.proximity_radius_feet`  |
//! | `TREE_MAP_CONCURRENCY`     | `materializer.concurrency`         |
//!
//! Categorical option lists live in the separate [`choices`] registry.

pub mod choices;
pub use choices::{ChoiceField, ChoiceRegistry};

use std::path::{Path, PathBuf};
use std::str::FromStr as _;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tree_map_geography_models::RegionKind;

/// Embedded default configuration.
const DEFAULT_CONFIG_TOML: &str = include_str!("../defaults/tree_map.toml");

/// Meters per international foot.
pub const METERS_PER_FOOT: f64 = 0.3048;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TOML could not be parsed into the expected shape.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Merged TOML could not be re-serialized.
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An environment variable held an unusable value.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// What the species resolver does when a token matches several rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Pick the match with the lowest species id and log a warning.
    FirstMatch,
    /// Refuse to pick and report every candidate.
    Reject,
}

/// Location of the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the `DuckDB` file.
    pub path: PathBuf,
}

/// Placement validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Region layer a new tree must fall inside.
    pub region_kind: RegionKind,
    /// Whether to reject trees placed too close to existing ones.
    pub proximity_check: bool,
    /// Minimum spacing between trees, in feet.
    pub proximity_radius_feet: f64,
}

impl PlacementConfig {
    /// The proximity radius in meters.
    #[must_use]
    pub fn proximity_radius_meters(&self) -> f64 {
        self.proximity_radius_feet * METERS_PER_FOOT
    }
}

/// Species resolution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesConfig {
    /// Behavior on ambiguous `symbol,cultivar` tokens.
    pub ambiguity: AmbiguityPolicy,
}

/// Intake settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Import event name attached to trees created through this channel.
    pub channel: String,
}

/// Aggregate materializer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializerConfig {
    /// Maximum number of regions recomputed at once.
    pub concurrency: usize,
    /// Region kinds recomputed by a full pass, in order.
    pub region_kinds: Vec<RegionKind>,
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeMapConfig {
    /// Store location.
    pub database: DatabaseConfig,
    /// Placement validation.
    pub placement: PlacementConfig,
    /// Species resolution.
    pub species: SpeciesConfig,
    /// Intake channel.
    pub intake: IntakeConfig,
    /// Aggregate materialization.
    pub materializer: MaterializerConfig,
}

impl Default for TreeMapConfig {
    fn default() -> Self {
        Self::embedded()
    }
}

impl TreeMapConfig {
    /// Returns the embedded default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML fails to parse. Since it is a
    /// compile-time constant, a parse failure indicates a development
    /// error and is caught by the tests below.
    #[must_use]
    pub fn embedded() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded tree map config: {e}"))
    }

    /// Loads the embedded defaults, overlays `path` if given, then applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or an
    /// environment variable holds an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
                log::debug!("Overlaying config from {}", path.display());
                Self::from_overlay(&contents)?
            }
            None => Self::embedded(),
        };

        config.apply_env_with(|name| std::env::var(name).ok())?;

        Ok(config)
    }

    /// Builds a config from the embedded defaults with the keys present in
    /// `overlay` replaced.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the overlay is not valid TOML or the
    /// merged result has the wrong shape.
    pub fn from_overlay(overlay: &str) -> Result<Self, ConfigError> {
        let mut base: toml::Table = DEFAULT_CONFIG_TOML.parse()?;
        let overlay: toml::Table = overlay.parse()?;
        merge_tables(&mut base, overlay);

        Ok(toml::from_str(&toml::to_string(&base)?)?)
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if a variable cannot be parsed.
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = lookup("TREE_MAP_DB") {
            self.database.path = PathBuf::from(path);
        }

        if let Some(value) = lookup("TREE_MAP_REGION_KIND") {
            self.placement.region_kind =
                RegionKind::from_str(value.trim()).map_err(|_| ConfigError::InvalidEnv {
                    name: "TREE_MAP_REGION_KIND",
                    value: value.clone(),
                })?;
        }

        if let Some(value) = lookup("TREE_MAP_PROXIMITY_CHECK") {
            self.placement.proximity_check = parse_bool(&value).ok_or_else(|| {
                ConfigError::InvalidEnv {
                    name: "TREE_MAP_PROXIMITY_CHECK",
                    value: value.clone(),
                }
            })?;
        }

        if let Some(value) = lookup("TREE_MAP_PROXIMITY_FEET") {
            self.placement.proximity_radius_feet = value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|feet| feet.is_finite() && *feet >= 0.0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    name: "TREE_MAP_PROXIMITY_FEET",
                    value: value.clone(),
                })?;
        }

        if let Some(value) = lookup("TREE_MAP_CONCURRENCY") {
            self.materializer.concurrency = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    name: "TREE_MAP_CONCURRENCY",
                    value: value.clone(),
                })?;
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Recursively replaces keys of `base` with those of `overlay`. Nested
/// tables merge; every other value replaces wholesale.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let config = TreeMapConfig::embedded();
        assert_eq!(config.placement.region_kind, RegionKind::Neighborhood);
        assert!(!config.placement.proximity_check);
        assert!((config.placement.proximity_radius_feet - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.species.ambiguity, AmbiguityPolicy::FirstMatch);
        assert_eq!(config.intake.channel, "site_add");
        assert_eq!(
            config.materializer.region_kinds,
            vec![RegionKind::Neighborhood, RegionKind::ZipCode]
        );
    }

    #[test]
    fn ten_feet_in_meters() {
        let config = TreeMapConfig::embedded();
        assert!((config.placement.proximity_radius_meters() - 3.048).abs() < 1e-9);
    }

    #[test]
    fn overlay_replaces_only_given_keys() {
        let config = TreeMapConfig::from_overlay(
            "[placement]\nproximity_check = true\n\n[species]\nambiguity = \"reject\"\n",
        )
        .unwrap();
        assert!(config.placement.proximity_check);
        assert!((config.placement.proximity_radius_feet - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.species.ambiguity, AmbiguityPolicy::Reject);
        assert_eq!(config.intake.channel, "site_add");
    }

    #[test]
    fn overlay_rejects_wrong_types() {
        assert!(TreeMapConfig::from_overlay("[materializer]\nconcurrency = \"lots\"\n").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env = BTreeMap::from([
            ("TREE_MAP_DB", "/tmp/trees.duckdb"),
            ("TREE_MAP_REGION_KIND", "zip_code"),
            ("TREE_MAP_PROXIMITY_CHECK", "yes"),
            ("TREE_MAP_PROXIMITY_FEET", "15"),
            ("TREE_MAP_CONCURRENCY", "2"),
        ]);
        let mut config = TreeMapConfig::embedded();
        config
            .apply_env_with(|name| env.get(name).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/trees.duckdb"));
        assert_eq!(config.placement.region_kind, RegionKind::ZipCode);
        assert!(config.placement.proximity_check);
        assert!((config.placement.proximity_radius_feet - 15.0).abs() < f64::EPSILON);
        assert_eq!(config.materializer.concurrency, 2);
    }

    #[test]
    fn invalid_env_is_reported() {
        let mut config = TreeMapConfig::embedded();
        let err = config
            .apply_env_with(|name| (name == "TREE_MAP_CONCURRENCY").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                name: "TREE_MAP_CONCURRENCY",
                ..
            }
        ));
    }
}
