//! Store traits.
//!
//! Each trait covers one concern so that components can ask for only what
//! they read. [`Store`] is the union, blanket-implemented for anything
//! that implements every part.

use async_trait::async_trait;
use tree_map_aggregate_models::{AggregateKey, AggregateRow, MetricSchema, ResourceMetrics};
use tree_map_geography_models::{BoundingBox, Region, RegionId, RegionKind, RegionRef};
use tree_map_tree_models::events::{
    ActionEvent, AlertEvent, EventId, NewActionEvent, NewAlertEvent, NewStatusEvent, StatusEvent,
    TreeEvents,
};
use tree_map_tree_models::{Coordinate, ImportEvent, NewTree, Species, SpeciesId, Tree, TreeId};

use crate::StoreError;

/// A filter over persisted trees, used for saved-search aggregates.
pub trait TreePredicate: Send + Sync {
    /// Whether the tree belongs to the result set.
    fn matches(&self, tree: &Tree) -> bool;
}

impl<F> TreePredicate for F
where
    F: Fn(&Tree) -> bool + Send + Sync,
{
    fn matches(&self, tree: &Tree) -> bool {
        self(tree)
    }
}

/// Region boundaries and spatial queries over tree locations.
#[async_trait]
pub trait GeometryStore: Send + Sync {
    /// Every region of a kind, sorted by id.
    async fn regions(&self, kind: RegionKind) -> Result<Vec<Region>, StoreError>;

    /// Regions of `kind` whose polygon contains the coordinate, sorted by
    /// id.
    async fn containing_regions(
        &self,
        coordinate: Coordinate,
        kind: RegionKind,
    ) -> Result<Vec<RegionRef>, StoreError>;

    /// Trees within `radius_meters` (inclusive, haversine) of the
    /// coordinate, sorted by id.
    async fn trees_within(
        &self,
        coordinate: Coordinate,
        radius_meters: f64,
    ) -> Result<Vec<Tree>, StoreError>;

    /// Trees located inside a region's polygon, sorted by id.
    async fn join_trees(&self, region_id: RegionId) -> Result<Vec<Tree>, StoreError>;

    /// The bounding box of a region's polygon.
    async fn region_bounding_box(&self, region_id: RegionId) -> Result<BoundingBox, StoreError>;

    /// The bounding box of every tree, or `None` when there are none.
    async fn trees_envelope(&self) -> Result<Option<BoundingBox>, StoreError>;
}

/// Species reference data.
#[async_trait]
pub trait SpeciesStore: Send + Sync {
    /// Looks up a species by primary key.
    async fn species_by_id(&self, id: SpeciesId) -> Result<Option<Species>, StoreError>;

    /// Every species sharing an accepted symbol, sorted by id.
    async fn species_by_accepted_symbol(&self, symbol: &str)
    -> Result<Vec<Species>, StoreError>;
}

/// Tree records and import provenance.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Persists a new tree and assigns its id.
    async fn insert_tree(&self, tree: NewTree) -> Result<Tree, StoreError>;

    /// Looks up a tree by primary key.
    async fn tree_by_id(&self, id: TreeId) -> Result<Option<Tree>, StoreError>;

    /// Every tree the predicate accepts, sorted by id.
    async fn trees_matching(
        &self,
        predicate: &dyn TreePredicate,
    ) -> Result<Vec<Tree>, StoreError>;

    /// Returns the import event with this name, creating it if needed.
    async fn get_or_create_import_event(&self, name: &str) -> Result<ImportEvent, StoreError>;
}

/// Append-only observation events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a status event.
    async fn append_status(&self, event: NewStatusEvent) -> Result<StatusEvent, StoreError>;

    /// Appends an unsolved alert event.
    async fn append_alert(&self, event: NewAlertEvent) -> Result<AlertEvent, StoreError>;

    /// Appends an action event.
    async fn append_action(&self, event: NewActionEvent) -> Result<ActionEvent, StoreError>;

    /// Marks an alert solved. Solving an already solved alert is a no-op.
    async fn resolve_alert(&self, id: EventId) -> Result<AlertEvent, StoreError>;

    /// Every event recorded against a tree, in write order.
    async fn events_for_tree(&self, tree_id: TreeId) -> Result<TreeEvents, StoreError>;
}

/// Per-tree resource metric values.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// The metric names currently available.
    async fn metric_schema(&self) -> Result<MetricSchema, StoreError>;

    /// Resource records for the given trees. Trees with no record are
    /// omitted.
    async fn resource_metrics(
        &self,
        tree_ids: &[TreeId],
    ) -> Result<Vec<ResourceMetrics>, StoreError>;
}

/// Materialized aggregate rows.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Inserts or replaces the row with the same key, atomically.
    async fn upsert_aggregate(&self, row: AggregateRow) -> Result<(), StoreError>;

    /// Looks up a row by key.
    async fn aggregate(&self, key: &AggregateKey) -> Result<Option<AggregateRow>, StoreError>;

    /// Every stored row, sorted by key.
    async fn aggregates(&self) -> Result<Vec<AggregateRow>, StoreError>;
}

/// Everything the tree map reads and writes.
pub trait Store:
    GeometryStore + SpeciesStore + TreeStore + EventStore + ResourceStore + AggregateStore
{
}

impl<T> Store for T where
    T: GeometryStore + SpeciesStore + TreeStore + EventStore + ResourceStore + AggregateStore
{
}
