#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Aggregate row, metric schema, and recompute report types.
//!
//! Aggregate rows are derived summaries owned entirely by the
//! materializer. The set of summed metrics is not fixed at compile time:
//! it comes from a [`MetricSchema`] discovered from the store at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tree_map_geography_models::{RegionId, RegionKind};
use tree_map_tree_models::TreeId;

/// The set of numeric resource metric names summed into aggregate rows.
///
/// Names are kept sorted and unique so that rows built from the same
/// schema always have the same shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSchema {
    names: Vec<String>,
}

impl MetricSchema {
    /// Builds a schema from metric names. Blank names are ignored and
    /// duplicates collapse.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names
            .into_iter()
            .map(Into::into)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    /// Metric names in sorted order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether the schema contains the given metric.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the schema has no metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// A metric map with every name in the schema set to zero.
    #[must_use]
    pub fn zeroed(&self) -> BTreeMap<String, f64> {
        self.names.iter().map(|name| (name.clone(), 0.0)).collect()
    }
}

/// Per-tree resource metric values (stormwater, energy, carbon, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    /// Tree the values belong to.
    pub tree_id: TreeId,
    /// Metric name to value. Missing names mean "no value".
    pub values: BTreeMap<String, f64>,
}

impl ResourceMetrics {
    /// Returns the value of a metric, treating an absent value as zero.
    #[must_use]
    pub fn value_or_zero(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }
}

/// Identity of an aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregateKey {
    /// Summary of one region.
    Region {
        /// Administrative layer of the region.
        kind: RegionKind,
        /// Region primary key.
        region_id: RegionId,
    },
    /// Summary of one saved search.
    Search {
        /// Stored search key (the empty string is the unfiltered search).
        key: String,
    },
}

impl AggregateKey {
    /// Key of the unfiltered saved search over every tree.
    #[must_use]
    pub const fn all_trees() -> Self {
        Self::Search { key: String::new() }
    }

    /// A flat string identity suitable for a primary key column.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Region { kind, region_id } => format!("region:{kind}:{region_id}"),
            Self::Search { key } => format!("search:{key}"),
        }
    }
}

impl std::fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// A materialized summary of the trees in one region or saved search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    /// Row identity.
    pub key: AggregateKey,
    /// Number of joined trees.
    pub total_trees: u64,
    /// Number of distinct species among joined trees. Trees without a
    /// species count toward `total_trees` only.
    pub distinct_species: u64,
    /// Metric name to summed value. Has exactly the names of the schema
    /// in force when the row was computed.
    pub metrics: BTreeMap<String, f64>,
}

impl AggregateRow {
    /// A row with no trees: zero counts and every metric set to zero.
    #[must_use]
    pub fn empty(key: AggregateKey, schema: &MetricSchema) -> Self {
        Self {
            key,
            total_trees: 0,
            distinct_species: 0,
            metrics: schema.zeroed(),
        }
    }
}

/// A region whose aggregate could not be recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionComputeFailure {
    /// Region primary key.
    pub region_id: RegionId,
    /// Region name, for operator-facing output.
    pub region_name: String,
    /// What went wrong.
    pub reason: String,
}

/// Outcome of recomputing every region of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecomputeReport {
    /// Region kind that was recomputed.
    pub kind: RegionKind,
    /// Number of regions whose rows were written.
    pub succeeded: u64,
    /// Regions that failed, sorted by region id.
    pub failed: Vec<RegionComputeFailure>,
}

impl RecomputeReport {
    /// Whether every region was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_sorts_and_dedups_names() {
        let schema = MetricSchema::new([
            "total_co2_stored",
            "annual_co2_avoided",
            " ",
            "annual_co2_avoided",
        ]);
        assert_eq!(schema.names(), &["annual_co2_avoided", "total_co2_stored"]);
        assert!(schema.contains("total_co2_stored"));
        assert!(!schema.contains("dbh"));
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn empty_row_has_every_metric_at_zero() {
        let schema = MetricSchema::new(["a", "b"]);
        let row = AggregateRow::empty(AggregateKey::all_trees(), &schema);
        assert_eq!(row.total_trees, 0);
        assert_eq!(row.distinct_species, 0);
        assert_eq!(row.metrics.len(), 2);
        assert!(row.metrics.values().all(|v| *v == 0.0));
    }

    #[test]
    fn storage_keys_are_distinct_per_kind() {
        let nbhd = AggregateKey::Region {
            kind: RegionKind::Neighborhood,
            region_id: RegionId(3),
        };
        let zip = AggregateKey::Region {
            kind: RegionKind::ZipCode,
            region_id: RegionId(3),
        };
        assert_eq!(nbhd.storage_key(), "region:neighborhood:3");
        assert_eq!(zip.storage_key(), "region:zip_code:3");
        assert_eq!(AggregateKey::all_trees().storage_key(), "search:");
    }

    #[test]
    fn missing_metric_reads_as_zero() {
        let metrics = ResourceMetrics {
            tree_id: TreeId(1),
            values: BTreeMap::from([("a".to_string(), 2.5)]),
        };
        assert!((metrics.value_or_zero("a") - 2.5).abs() < f64::EPSILON);
        assert!(metrics.value_or_zero("b").abs() < f64::EPSILON);
    }

    #[test]
    fn key_serializes_with_type_tag() {
        let json = serde_json::to_value(AggregateKey::Search {
            key: "species=QUAL".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "search");
        assert_eq!(json["key"], "species=QUAL");
    }
}
