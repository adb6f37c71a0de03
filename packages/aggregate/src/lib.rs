#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Aggregate materialization.
//!
//! Joins trees into regions (or into a saved search's result set) and
//! writes one summary row per region or search: the tree count, the
//! number of distinct species, and the sum of every resource metric in
//! the [`MetricSchema`]. Regions are independent; they are recomputed
//! concurrently and one region failing does not stop the rest.

pub mod progress;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt as _};
use thiserror::Error;
use tree_map_aggregate_models::{
    AggregateKey, AggregateRow, MetricSchema, RecomputeReport, RegionComputeFailure,
};
use tree_map_database::{Store, StoreError, TreePredicate};
use tree_map_geography_models::{BoundingBox, Region, RegionKind};
use tree_map_tree_models::{Tree, TreeId};

use crate::progress::{ProgressCallback, null_progress};

/// Errors that abort a whole recompute pass.
///
/// Failures confined to one region are reported in the
/// [`RecomputeReport`] instead.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The store failed outside of any single region.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A named tree filter whose aggregate is kept materialized.
#[derive(Clone)]
pub struct SavedSearch {
    /// Storage key of the search.
    pub key: String,
    /// Trees included in the search.
    pub predicate: Arc<dyn TreePredicate>,
}

impl SavedSearch {
    /// Creates a saved search.
    #[must_use]
    pub fn new(key: impl Into<String>, predicate: Arc<dyn TreePredicate>) -> Self {
        Self {
            key: key.into(),
            predicate,
        }
    }

    /// The default search: empty key, every tree.
    #[must_use]
    pub fn all_trees() -> Self {
        Self::new(String::new(), Arc::new(|_: &Tree| true))
    }
}

impl std::fmt::Debug for SavedSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavedSearch")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Recomputes aggregate rows.
pub struct Materializer<'a, S: Store + ?Sized> {
    store: &'a S,
    schema: MetricSchema,
    concurrency: usize,
    progress: Arc<dyn ProgressCallback>,
}

impl<'a, S: Store + ?Sized> Materializer<'a, S> {
    /// Creates a materializer summing the metrics in `schema`, working on
    /// at most `concurrency` regions at once.
    #[must_use]
    pub fn new(store: &'a S, schema: MetricSchema, concurrency: usize) -> Self {
        Self {
            store,
            schema,
            concurrency: concurrency.max(1),
            progress: null_progress(),
        }
    }

    /// Reports region progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// The metric schema rows are built with.
    #[must_use]
    pub const fn schema(&self) -> &MetricSchema {
        &self.schema
    }

    /// Recomputes the row of every region of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError`] if the regions or the tree envelope
    /// cannot be read. Per-region failures are listed in the report.
    pub async fn recompute(&self, kind: RegionKind) -> Result<RecomputeReport, MaterializeError> {
        let regions = self.store.regions(kind).await?;
        let envelope = self.store.trees_envelope().await?;

        log::info!(
            "Recomputing {} {kind} aggregates (concurrency={})",
            regions.len(),
            self.concurrency
        );
        self.progress.set_message(format!("{kind} aggregates"));
        self.progress.set_total(regions.len() as u64);

        let results: Vec<_> = stream::iter(regions.iter().map(|region| async move {
            let result = self.recompute_region(region, envelope).await;
            self.progress.inc(1);
            (region, result)
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let mut report = RecomputeReport {
            kind,
            succeeded: 0,
            failed: Vec::new(),
        };

        for (region, result) in results {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    log::warn!(
                        "Failed to recompute {kind} {} ({}): {e}",
                        region.id,
                        region.name
                    );
                    report.failed.push(RegionComputeFailure {
                        region_id: region.id,
                        region_name: region.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.failed.sort_by_key(|failure| failure.region_id);
        self.progress.finish(format!(
            "{kind}: {} written, {} failed",
            report.succeeded,
            report.failed.len()
        ));

        Ok(report)
    }

    /// Recomputes every kind in order, one report per kind.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError`] on the first pass that cannot start.
    pub async fn recompute_all(
        &self,
        kinds: &[RegionKind],
    ) -> Result<Vec<RecomputeReport>, MaterializeError> {
        let mut reports = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            reports.push(self.recompute(kind).await?);
        }
        Ok(reports)
    }

    /// Recomputes the row of one saved search.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError`] if the trees, their metrics, or the
    /// row write fail.
    pub async fn recompute_search_aggregate(
        &self,
        key: &str,
        predicate: &dyn TreePredicate,
    ) -> Result<AggregateRow, MaterializeError> {
        let trees = self.store.trees_matching(predicate).await?;
        let row = self
            .summarize(
                AggregateKey::Search {
                    key: key.to_string(),
                },
                &trees,
            )
            .await?;

        self.store.upsert_aggregate(row.clone()).await?;
        log::debug!("Search {key:?}: {} trees", row.total_trees);

        Ok(row)
    }

    /// Recomputes each saved search in order.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError`] on the first search that fails.
    pub async fn recompute_saved_searches(
        &self,
        searches: &[SavedSearch],
    ) -> Result<Vec<AggregateRow>, MaterializeError> {
        let mut rows = Vec::with_capacity(searches.len());
        for search in searches {
            rows.push(
                self.recompute_search_aggregate(&search.key, search.predicate.as_ref())
                    .await?,
            );
        }
        Ok(rows)
    }

    async fn recompute_region(
        &self,
        region: &Region,
        trees_envelope: Option<BoundingBox>,
    ) -> Result<(), StoreError> {
        // Also surfaces unusable boundaries before any short-circuit.
        let bbox = self.store.region_bounding_box(region.id).await?;

        let trees = match trees_envelope {
            Some(envelope) if envelope.intersects(&bbox) => {
                self.store.join_trees(region.id).await?
            }
            _ => Vec::new(),
        };

        let key = AggregateKey::Region {
            kind: region.kind,
            region_id: region.id,
        };
        let row = self.summarize(key, &trees).await?;
        self.store.upsert_aggregate(row).await
    }

    async fn summarize(&self, key: AggregateKey, trees: &[Tree]) -> Result<AggregateRow, StoreError> {
        let mut row = AggregateRow::empty(key, &self.schema);
        if trees.is_empty() {
            return Ok(row);
        }

        let mut ids: Vec<TreeId> = trees.iter().map(|tree| tree.id).collect();
        ids.sort();
        ids.dedup();

        row.total_trees = ids.len() as u64;
        row.distinct_species = trees
            .iter()
            .filter_map(|tree| tree.species_id)
            .collect::<BTreeSet<_>>()
            .len() as u64;

        let resources: BTreeMap<TreeId, _> = self
            .store
            .resource_metrics(&ids)
            .await?
            .into_iter()
            .map(|record| (record.tree_id, record))
            .collect();

        // Ascending tree id, so equal inputs give bit-identical sums.
        for id in &ids {
            let Some(record) = resources.get(id) else {
                continue;
            };
            for (name, total) in &mut row.metrics {
                *total += record.value_or_zero(name);
            }
        }

        Ok(row)
    }
}
