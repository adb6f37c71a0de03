//! Registry of categorical option lists.
//!
//! Each categorical intake field (plot type, condition codes, alert and
//! action categories) accepts only the keys listed for it here. The
//! registry is an explicit value handed to whoever validates submissions;
//! there is no process-wide copy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::ConfigError;

/// Embedded default option lists.
const DEFAULT_CHOICES_TOML: &str = include_str!("../defaults/choices.toml");

/// A categorical field with a fixed option list.
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
pub enum ChoiceField {
    /// Plot type.
    Plot,
    /// Sidewalk damage code.
    SidewalkDamage,
    /// Overall condition code.
    Condition,
    /// Canopy condition code.
    CanopyCondition,
    /// Maintenance action category.
    Action,
    /// Alert category.
    Alert,
}

impl ChoiceField {
    /// Every categorical field.
    pub const ALL: &[Self] = &[
        Self::Plot,
        Self::SidewalkDamage,
        Self::Condition,
        Self::CanopyCondition,
        Self::Action,
        Self::Alert,
    ];
}

/// One option: the stored key and its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Stored code.
    pub key: String,
    /// Human-readable label.
    pub value: String,
}

/// Option lists for every categorical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChoiceRegistry {
    fields: BTreeMap<ChoiceField, Vec<Choice>>,
}

impl Default for ChoiceRegistry {
    fn default() -> Self {
        Self::embedded()
    }
}

impl ChoiceRegistry {
    /// Returns the embedded default option lists.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML fails to parse, which indicates a
    /// development error.
    #[must_use]
    pub fn embedded() -> Self {
        Self::from_toml_str(DEFAULT_CHOICES_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded choice registry: {e}"))
    }

    /// Parses option lists from TOML of the form `[[field]] key = "..",
    /// value = ".."`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed or names an
    /// unknown field.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// The options for a field, in declaration order. Empty if the field
    /// has no list.
    #[must_use]
    pub fn choices(&self, field: ChoiceField) -> &[Choice] {
        self.fields.get(&field).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether `key` is one of the field's options.
    #[must_use]
    pub fn is_valid(&self, field: ChoiceField, key: &str) -> bool {
        self.choices(field).iter().any(|choice| choice.key == key)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn every_field_has_options() {
        let registry = ChoiceRegistry::embedded();
        for field in ChoiceField::ALL {
            assert!(
                !registry.choices(*field).is_empty(),
                "Choice field {field} has no options"
            );
        }
    }

    #[test]
    fn keys_are_unique_per_field() {
        let registry = ChoiceRegistry::embedded();
        for field in ChoiceField::ALL {
            let mut seen = BTreeSet::new();
            for choice in registry.choices(*field) {
                assert!(
                    seen.insert(&choice.key),
                    "Duplicate key {} in choice field {field}",
                    choice.key
                );
            }
        }
    }

    #[test]
    fn validates_keys() {
        let registry = ChoiceRegistry::embedded();
        assert!(registry.is_valid(ChoiceField::Action, "pruned"));
        assert!(registry.is_valid(ChoiceField::Condition, "5"));
        assert!(!registry.is_valid(ChoiceField::Condition, "pruned"));
        assert!(registry.is_valid(ChoiceField::Alert, "needs_watering"));
    }

    #[test]
    fn custom_registry_only_knows_listed_fields() {
        let registry =
            ChoiceRegistry::from_toml_str("[[plot]]\nkey = \"9\"\nvalue = \"Rooftop\"\n").unwrap();
        assert!(registry.is_valid(ChoiceField::Plot, "9"));
        assert!(registry.choices(ChoiceField::Alert).is_empty());
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(ChoiceRegistry::from_toml_str("[[color]]\nkey = \"1\"\nvalue = \"Red\"\n").is_err());
    }
}
