//! In-process store.
//!
//! All state lives behind a single `tokio` read/write lock, so every
//! write (including each aggregate upsert) is atomic with respect to
//! readers. Reference data (regions, species, resource metrics) is seeded
//! through the `with_*` builder methods.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tree_map_aggregate_models::{AggregateKey, AggregateRow, MetricSchema, ResourceMetrics};
use tree_map_geography_models::{BoundingBox, Region, RegionId, RegionKind, RegionRef};
use tree_map_spatial::{RegionIndex, TreeIndex};
use tree_map_tree_models::events::{
    ActionEvent, AlertEvent, EventId, NewActionEvent, NewAlertEvent, NewStatusEvent, StatusEvent,
    TreeEvents,
};
use tree_map_tree_models::{
    Coordinate, ImportEvent, ImportEventId, NewTree, Species, SpeciesId, Tree, TreeId,
};

use crate::StoreError;
use crate::store::{
    AggregateStore, EventStore, GeometryStore, ResourceStore, SpeciesStore, TreePredicate,
    TreeStore,
};

#[derive(Default)]
struct MemoryState {
    regions: BTreeMap<RegionId, Region>,
    region_index: RegionIndex,
    species: BTreeMap<SpeciesId, Species>,
    trees: BTreeMap<TreeId, Tree>,
    tree_index: TreeIndex,
    import_events: Vec<ImportEvent>,
    statuses: Vec<StatusEvent>,
    alerts: Vec<AlertEvent>,
    actions: Vec<ActionEvent>,
    metric_schema: MetricSchema,
    resources: BTreeMap<TreeId, ResourceMetrics>,
    aggregates: BTreeMap<AggregateKey, AggregateRow>,
}

impl MemoryState {
    fn next_tree_id(&self) -> TreeId {
        TreeId(self.trees.keys().next_back().map_or(1, |id| id.0 + 1))
    }

    fn trees_by_ids(&self, ids: &[TreeId]) -> Vec<Tree> {
        ids.iter()
            .filter_map(|id| self.trees.get(id))
            .cloned()
            .collect()
    }
}

/// Ids are 1-based positions in append-only lists.
fn next_event_id(len: usize) -> EventId {
    EventId(i64::try_from(len).map_or(i64::MAX, |n| n + 1))
}

/// A [`crate::Store`] held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// An empty store with no regions, species, or metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds region boundaries and rebuilds the region index.
    #[must_use]
    pub fn with_regions(mut self, regions: impl IntoIterator<Item = Region>) -> Self {
        let state = self.state.get_mut();
        for region in regions {
            state.regions.insert(region.id, region);
        }
        let all: Vec<Region> = state.regions.values().cloned().collect();
        state.region_index = RegionIndex::build(&all);
        self
    }

    /// Adds species reference rows.
    #[must_use]
    pub fn with_species(mut self, species: impl IntoIterator<Item = Species>) -> Self {
        let state = self.state.get_mut();
        for row in species {
            state.species.insert(row.id, row);
        }
        self
    }

    /// Adds already-persisted trees.
    #[must_use]
    pub fn with_trees(mut self, trees: impl IntoIterator<Item = Tree>) -> Self {
        let state = self.state.get_mut();
        for tree in trees {
            state.tree_index.insert(tree.id, tree.coordinate);
            state.trees.insert(tree.id, tree);
        }
        self
    }

    /// Sets the resource metric names.
    #[must_use]
    pub fn with_metric_schema(mut self, schema: MetricSchema) -> Self {
        self.state.get_mut().metric_schema = schema;
        self
    }

    /// Adds per-tree resource records.
    #[must_use]
    pub fn with_resources(mut self, resources: impl IntoIterator<Item = ResourceMetrics>) -> Self {
        let state = self.state.get_mut();
        for record in resources {
            state.resources.insert(record.tree_id, record);
        }
        self
    }
}

#[async_trait]
impl GeometryStore for MemoryStore {
    async fn regions(&self, kind: RegionKind) -> Result<Vec<Region>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .regions
            .values()
            .filter(|region| region.kind == kind)
            .cloned()
            .collect())
    }

    async fn containing_regions(
        &self,
        coordinate: Coordinate,
        kind: RegionKind,
    ) -> Result<Vec<RegionRef>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .region_index
            .containing(coordinate.longitude, coordinate.latitude, kind))
    }

    async fn trees_within(
        &self,
        coordinate: Coordinate,
        radius_meters: f64,
    ) -> Result<Vec<Tree>, StoreError> {
        let state = self.state.read().await;
        let ids = state.tree_index.within_distance(coordinate, radius_meters);
        Ok(state.trees_by_ids(&ids))
    }

    async fn join_trees(&self, region_id: RegionId) -> Result<Vec<Tree>, StoreError> {
        let state = self.state.read().await;
        let ids = state
            .tree_index
            .within_region(&state.region_index, region_id)?;
        Ok(state.trees_by_ids(&ids))
    }

    async fn region_bounding_box(&self, region_id: RegionId) -> Result<BoundingBox, StoreError> {
        let state = self.state.read().await;
        Ok(state.region_index.bounding_box(region_id)?)
    }

    async fn trees_envelope(&self) -> Result<Option<BoundingBox>, StoreError> {
        Ok(self.state.read().await.tree_index.envelope())
    }
}

#[async_trait]
impl SpeciesStore for MemoryStore {
    async fn species_by_id(&self, id: SpeciesId) -> Result<Option<Species>, StoreError> {
        Ok(self.state.read().await.species.get(&id).cloned())
    }

    async fn species_by_accepted_symbol(
        &self,
        symbol: &str,
    ) -> Result<Vec<Species>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .species
            .values()
            .filter(|species| species.accepted_symbol == symbol)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TreeStore for MemoryStore {
    async fn insert_tree(&self, tree: NewTree) -> Result<Tree, StoreError> {
        let mut state = self.state.write().await;
        let id = state.next_tree_id();
        let tree = Tree::from_new(id, tree).ok_or_else(|| StoreError::InvalidRecord {
            message: "tree has no coordinate".to_string(),
        })?;

        state.tree_index.insert(tree.id, tree.coordinate);
        state.trees.insert(tree.id, tree.clone());
        Ok(tree)
    }

    async fn tree_by_id(&self, id: TreeId) -> Result<Option<Tree>, StoreError> {
        Ok(self.state.read().await.trees.get(&id).cloned())
    }

    async fn trees_matching(
        &self,
        predicate: &dyn TreePredicate,
    ) -> Result<Vec<Tree>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .trees
            .values()
            .filter(|tree| predicate.matches(tree))
            .cloned()
            .collect())
    }

    async fn get_or_create_import_event(&self, name: &str) -> Result<ImportEvent, StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.import_events.iter().find(|e| e.name == name) {
            return Ok(existing.clone());
        }

        let event = ImportEvent {
            id: ImportEventId(next_event_id(state.import_events.len()).0),
            name: name.to_string(),
        };
        state.import_events.push(event.clone());
        Ok(event)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append_status(&self, event: NewStatusEvent) -> Result<StatusEvent, StoreError> {
        let mut state = self.state.write().await;
        let stored = StatusEvent {
            id: next_event_id(state.statuses.len()),
            tree_id: event.tree_id,
            reported_by: event.reported_by,
            key: event.key,
            value: event.value,
            reported_at: event.reported_at,
        };
        state.statuses.push(stored.clone());
        Ok(stored)
    }

    async fn append_alert(&self, event: NewAlertEvent) -> Result<AlertEvent, StoreError> {
        let mut state = self.state.write().await;
        let stored = AlertEvent {
            id: next_event_id(state.alerts.len()),
            tree_id: event.tree_id,
            reported_by: event.reported_by,
            key: event.key,
            value: event.value,
            solved: false,
        };
        state.alerts.push(stored.clone());
        Ok(stored)
    }

    async fn append_action(&self, event: NewActionEvent) -> Result<ActionEvent, StoreError> {
        let mut state = self.state.write().await;
        let stored = ActionEvent {
            id: next_event_id(state.actions.len()),
            tree_id: event.tree_id,
            reported_by: event.reported_by,
            key: event.key,
            value: event.value,
        };
        state.actions.push(stored.clone());
        Ok(stored)
    }

    async fn resolve_alert(&self, id: EventId) -> Result<AlertEvent, StoreError> {
        let mut state = self.state.write().await;
        let alert = state
            .alerts
            .iter_mut()
            .find(|alert| alert.id == id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "alert",
                id: id.0.to_string(),
            })?;
        alert.solved = true;
        Ok(alert.clone())
    }

    async fn events_for_tree(&self, tree_id: TreeId) -> Result<TreeEvents, StoreError> {
        let state = self.state.read().await;
        Ok(TreeEvents {
            statuses: state
                .statuses
                .iter()
                .filter(|e| e.tree_id == tree_id)
                .cloned()
                .collect(),
            alerts: state
                .alerts
                .iter()
                .filter(|e| e.tree_id == tree_id)
                .cloned()
                .collect(),
            actions: state
                .actions
                .iter()
                .filter(|e| e.tree_id == tree_id)
                .cloned()
                .collect(),
        })
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn metric_schema(&self) -> Result<MetricSchema, StoreError> {
        Ok(self.state.read().await.metric_schema.clone())
    }

    async fn resource_metrics(
        &self,
        tree_ids: &[TreeId],
    ) -> Result<Vec<ResourceMetrics>, StoreError> {
        let state = self.state.read().await;
        Ok(tree_ids
            .iter()
            .filter_map(|id| state.resources.get(id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn upsert_aggregate(&self, row: AggregateRow) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .aggregates
            .insert(row.key.clone(), row);
        Ok(())
    }

    async fn aggregate(&self, key: &AggregateKey) -> Result<Option<AggregateRow>, StoreError> {
        Ok(self.state.read().await.aggregates.get(key).cloned())
    }

    async fn aggregates(&self) -> Result<Vec<AggregateRow>, StoreError> {
        Ok(self.state.read().await.aggregates.values().cloned().collect())
    }
}
