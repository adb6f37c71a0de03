//! Append-only observation events recorded against a tree.
//!
//! All three kinds share the shape `(tree, reported_by, key, value,
//! timestamp)`. Events never change once written, with one exception: an
//! alert's `solved` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{ActorId, TreeId};

/// Primary key of an observation event. Unique per event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

/// The kind of an observation event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// A measurement or condition code.
    Status,
    /// A reported problem.
    Alert,
    /// A maintenance action.
    Action,
}

/// Canonical measurement names recorded as status events.
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
pub enum StatusKey {
    /// Total height in feet.
    Height,
    /// Height to the bottom of the canopy in feet.
    CanopyHeight,
    /// Diameter at breast height in inches.
    Dbh,
    /// Sidewalk damage code.
    SidewalkDamage,
    /// Overall condition code.
    Condition,
    /// Canopy condition code.
    CanopyCondition,
}

impl StatusKey {
    /// Every status key, in intake order.
    pub const ALL: &[Self] = &[
        Self::Height,
        Self::CanopyHeight,
        Self::Dbh,
        Self::SidewalkDamage,
        Self::Condition,
        Self::CanopyCondition,
    ];

    /// Whether values for this key are numeric measurements rather than
    /// categorical codes.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Height | Self::CanopyHeight | Self::Dbh)
    }
}

/// A status value: either a measurement or a categorical code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    /// Numeric measurement.
    Number(f64),
    /// Categorical code from a choice list.
    Code(String),
}

impl std::fmt::Display for StatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Code(code) => f.write_str(code),
        }
    }
}

/// A status event about to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStatusEvent {
    /// Tree the measurement belongs to.
    pub tree_id: TreeId,
    /// Reporting actor.
    pub reported_by: ActorId,
    /// Measurement name.
    pub key: StatusKey,
    /// Measured value.
    pub value: StatusValue,
    /// Write time.
    pub reported_at: DateTime<Utc>,
}

/// A persisted status event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Primary key.
    pub id: EventId,
    /// Tree the measurement belongs to.
    pub tree_id: TreeId,
    /// Reporting actor.
    pub reported_by: ActorId,
    /// Measurement name.
    pub key: StatusKey,
    /// Measured value.
    pub value: StatusValue,
    /// Write time.
    pub reported_at: DateTime<Utc>,
}

/// An alert event about to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAlertEvent {
    /// Tree the alert concerns.
    pub tree_id: TreeId,
    /// Reporting actor.
    pub reported_by: ActorId,
    /// Alert category code.
    pub key: String,
    /// When the alert was raised.
    pub value: DateTime<Utc>,
}

/// A persisted alert event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Primary key.
    pub id: EventId,
    /// Tree the alert concerns.
    pub tree_id: TreeId,
    /// Reporting actor.
    pub reported_by: ActorId,
    /// Alert category code.
    pub key: String,
    /// When the alert was raised.
    pub value: DateTime<Utc>,
    /// Whether the alert has been dealt with. The only mutable event field.
    pub solved: bool,
}

/// An action event about to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewActionEvent {
    /// Tree the action was performed on.
    pub tree_id: TreeId,
    /// Reporting actor.
    pub reported_by: ActorId,
    /// Action category code (e.g. `"pruned"`).
    pub key: String,
    /// When the action was recorded.
    pub value: DateTime<Utc>,
}

/// A persisted action event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvent {
    /// Primary key.
    pub id: EventId,
    /// Tree the action was performed on.
    pub tree_id: TreeId,
    /// Reporting actor.
    pub reported_by: ActorId,
    /// Action category code.
    pub key: String,
    /// When the action was recorded.
    pub value: DateTime<Utc>,
}

/// Every event recorded against one tree, each list in write order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeEvents {
    /// Status events.
    pub statuses: Vec<StatusEvent>,
    /// Alert events.
    pub alerts: Vec<AlertEvent>,
    /// Action events.
    pub actions: Vec<ActionEvent>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn status_keys_use_canonical_names() {
        assert_eq!(StatusKey::Dbh.as_ref(), "dbh");
        assert_eq!(StatusKey::CanopyHeight.to_string(), "canopy_height");
        assert_eq!(
            StatusKey::from_str("sidewalk_damage").unwrap(),
            StatusKey::SidewalkDamage
        );
    }

    #[test]
    fn only_measurements_are_numeric() {
        let numeric: Vec<StatusKey> = StatusKey::ALL
            .iter()
            .copied()
            .filter(|k| k.is_numeric())
            .collect();
        assert_eq!(
            numeric,
            vec![StatusKey::Height, StatusKey::CanopyHeight, StatusKey::Dbh]
        );
    }

    #[test]
    fn status_value_serializes_untagged() {
        assert_eq!(
            serde_json::to_string(&StatusValue::Number(12.5)).unwrap(),
            "12.5"
        );
        assert_eq!(
            serde_json::to_string(&StatusValue::Code("2".to_string())).unwrap(),
            "\"2\""
        );
    }
}
