#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Turns a submitted add-a-tree form into a persisted tree plus its
//! initial observation events.
//!
//! Everything that can reject a submission (species, placement, choice
//! codes) runs before the tree is written, so a rejected submission
//! leaves no tree behind. Events are written one at a time after the
//! tree; a failed event becomes a warning on the outcome instead of
//! undoing the tree or the other events.

use chrono::Utc;
use thiserror::Error;
use tree_map_config::{ChoiceField, ChoiceRegistry, TreeMapConfig};
use tree_map_database::{Store, StoreError};
use tree_map_intake_models::{IntakeOutcome, IntakeWarning, Submission};
use tree_map_placement::{PlacementError, PlacementValidator};
use tree_map_species::{SpeciesError, SpeciesResolver};
use tree_map_tree_models::events::{
    EventKind, NewActionEvent, NewAlertEvent, NewStatusEvent, StatusKey, StatusValue,
};
use tree_map_tree_models::{ActorId, NewTree, Tree};

/// Errors that reject a submission. None of them leave a tree behind.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// The species token could not be resolved.
    #[error(transparent)]
    Species(#[from] SpeciesError),

    /// The location was rejected.
    #[error(transparent)]
    Placement(#[from] PlacementError),

    /// A categorical field holds a code that is not in its option list.
    #[error("{value:?} is not a valid {field} option")]
    InvalidChoice {
        /// Field that was checked.
        field: ChoiceField,
        /// Submitted code.
        value: String,
    },

    /// The store failed before the tree was persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Treats blank strings as absent.
fn present(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Validates and persists submissions.
pub struct IntakePipeline<'a, S: Store + ?Sized> {
    store: &'a S,
    config: &'a TreeMapConfig,
    choices: &'a ChoiceRegistry,
}

impl<'a, S: Store + ?Sized> IntakePipeline<'a, S> {
    /// Creates a pipeline writing to `store`.
    #[must_use]
    pub const fn new(store: &'a S, config: &'a TreeMapConfig, choices: &'a ChoiceRegistry) -> Self {
        Self {
            store,
            config,
            choices,
        }
    }

    /// Validates a submission and persists the tree and its events.
    ///
    /// # Errors
    ///
    /// Returns [`IntakeError`] if the submission is rejected or the tree
    /// cannot be written. Event write failures are reported as warnings
    /// on the returned [`IntakeOutcome`] instead.
    pub async fn intake(
        &self,
        submission: &Submission,
        actor: ActorId,
    ) -> Result<IntakeOutcome, IntakeError> {
        let species_id = match present(submission.species.as_ref()) {
            Some(token) => Some(
                SpeciesResolver::new(self.store, self.config.species.ambiguity)
                    .resolve(token, None)
                    .await?,
            ),
            None => None,
        };

        let placement = PlacementValidator::new(self.store, &self.config.placement)
            .validate(submission.longitude, submission.latitude)
            .await?;

        self.check_choices(submission)?;

        let import_event = self
            .store
            .get_or_create_import_event(&self.config.intake.channel)
            .await?;

        let street = present(submission.address_street.as_ref()).map(ToString::to_string);
        let new_tree = NewTree {
            coordinate: Some(placement.coordinate),
            geocoded_address: street.clone(),
            address_street: street,
            address_city: present(submission.address_city.as_ref()).map(ToString::to_string),
            address_zip: present(submission.address_zip.as_ref()).map(ToString::to_string),
            species_id,
            plot_width: submission.plot_width,
            plot_length: submission.plot_length,
            plot_type: present(submission.plot_type.as_ref()).map(ToString::to_string),
            powerline_conflict_potential: submission.power_lines,
            import_event_id: Some(import_event.id),
            last_updated_by: Some(actor),
        };

        let tree = self.store.insert_tree(new_tree).await?;
        log::info!(
            "Added tree {} in {} via {}",
            tree.id,
            placement
                .regions
                .iter()
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            import_event.name
        );

        let warnings = self.write_events(&tree, submission, actor).await;

        Ok(IntakeOutcome { tree, warnings })
    }

    fn check_choices(&self, submission: &Submission) -> Result<(), IntakeError> {
        let fields = [
            (ChoiceField::Plot, &submission.plot_type),
            (ChoiceField::SidewalkDamage, &submission.sidewalk_damage),
            (ChoiceField::Condition, &submission.condition),
            (ChoiceField::CanopyCondition, &submission.canopy_condition),
            (ChoiceField::Alert, &submission.alert),
            (ChoiceField::Action, &submission.action),
        ];

        for (field, value) in fields {
            let Some(code) = present(value.as_ref()) else {
                continue;
            };
            if !self.choices.is_valid(field, code) {
                return Err(IntakeError::InvalidChoice {
                    field,
                    value: code.to_string(),
                });
            }
        }

        Ok(())
    }

    async fn write_events(
        &self,
        tree: &Tree,
        submission: &Submission,
        actor: ActorId,
    ) -> Vec<IntakeWarning> {
        let mut warnings = Vec::new();

        for (key, value) in status_values(submission) {
            let event = NewStatusEvent {
                tree_id: tree.id,
                reported_by: actor,
                key,
                value,
                reported_at: Utc::now(),
            };
            if let Err(e) = self.store.append_status(event).await {
                warnings.push(event_failure(tree, EventKind::Status, key.as_ref(), &e));
            }
        }

        if let Some(code) = present(submission.alert.as_ref()) {
            let event = NewAlertEvent {
                tree_id: tree.id,
                reported_by: actor,
                key: code.to_string(),
                value: Utc::now(),
            };
            if let Err(e) = self.store.append_alert(event).await {
                warnings.push(event_failure(tree, EventKind::Alert, code, &e));
            }
        }

        if let Some(code) = present(submission.action.as_ref()) {
            let event = NewActionEvent {
                tree_id: tree.id,
                reported_by: actor,
                key: code.to_string(),
                value: Utc::now(),
            };
            if let Err(e) = self.store.append_action(event).await {
                warnings.push(event_failure(tree, EventKind::Action, code, &e));
            }
        }

        warnings
    }
}

/// Present measurements, in [`StatusKey::ALL`] order.
fn status_values(submission: &Submission) -> Vec<(StatusKey, StatusValue)> {
    StatusKey::ALL
        .iter()
        .filter_map(|&key| {
            let value = match key {
                StatusKey::Height => submission.height.map(StatusValue::Number),
                StatusKey::CanopyHeight => submission.canopy_height.map(StatusValue::Number),
                StatusKey::Dbh => submission.dbh.map(StatusValue::Number),
                StatusKey::SidewalkDamage => code_value(submission.sidewalk_damage.as_ref()),
                StatusKey::Condition => code_value(submission.condition.as_ref()),
                StatusKey::CanopyCondition => code_value(submission.canopy_condition.as_ref()),
            };
            value.map(|value| (key, value))
        })
        .collect()
}

fn code_value(value: Option<&String>) -> Option<StatusValue> {
    present(value).map(|code| StatusValue::Code(code.to_string()))
}

fn event_failure(tree: &Tree, kind: EventKind, key: &str, error: &StoreError) -> IntakeWarning {
    log::warn!("Tree {}: failed to record {kind} event {key:?}: {error}", tree.id);
    IntakeWarning::PartialEventWriteFailure {
        kind,
        key: key.to_string(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tree_map_aggregate_models::{AggregateKey, AggregateRow, MetricSchema, ResourceMetrics};
    use tree_map_database::{
        AggregateStore, EventStore, GeometryStore, MemoryStore, ResourceStore, SpeciesStore,
        TreePredicate, TreeStore,
    };
    use tree_map_geography_models::{BoundingBox, Region, RegionId, RegionKind, RegionRef};
    use tree_map_tree_models::events::{
        ActionEvent, AlertEvent, EventId, StatusEvent, TreeEvents,
    };
    use tree_map_tree_models::{Coordinate, ImportEvent, Species, SpeciesId, TreeId};

    use super::*;

    fn square(west: f64, south: f64, size: f64) -> String {
        let (east, north) = (west + size, south + size);
        format!(
            r#"{{"type":"Polygon","coordinates":[[[{west},{south}],[{east},{south}],[{east},{north}],[{west},{north}],[{west},{south}]]]}}"#
        )
    }

    fn memory_store() -> MemoryStore {
        MemoryStore::new()
            .with_regions([Region {
                id: RegionId(1),
                kind: RegionKind::Neighborhood,
                name: "Point Breeze".to_string(),
                boundary_geojson: square(-75.2, 39.9, 0.1),
            }])
            .with_species([Species {
                id: SpeciesId(5),
                symbol: "QUAL".to_string(),
                accepted_symbol: "QUAL".to_string(),
                cultivar_name: None,
                scientific_name: "Quercus alba".to_string(),
                common_name: Some("white oak".to_string()),
            }])
    }

    fn submission() -> Submission {
        Submission {
            address_street: Some("1500 Market St".to_string()),
            address_city: Some("Philadelphia".to_string()),
            longitude: Some(-75.15),
            latitude: Some(39.95),
            species: Some("QUAL,".to_string()),
            dbh: Some(12.5),
            ..Submission::default()
        }
    }

    async fn all_trees<S: TreeStore + ?Sized>(store: &S) -> Vec<Tree> {
        store.trees_matching(&|_: &Tree| true).await.unwrap()
    }

    /// Delegates to a [`MemoryStore`] but refuses every alert write.
    struct AlertlessStore(MemoryStore);

    #[async_trait]
    impl GeometryStore for AlertlessStore {
        async fn regions(&self, kind: RegionKind) -> Result<Vec<Region>, StoreError> {
            self.0.regions(kind).await
        }

        async fn containing_regions(
            &self,
            coordinate: Coordinate,
            kind: RegionKind,
        ) -> Result<Vec<RegionRef>, StoreError> {
            self.0.containing_regions(coordinate, kind).await
        }

        async fn trees_within(
            &self,
            coordinate: Coordinate,
            radius_meters: f64,
        ) -> Result<Vec<Tree>, StoreError> {
            self.0.trees_within(coordinate, radius_meters).await
        }

        async fn join_trees(&self, region_id: RegionId) -> Result<Vec<Tree>, StoreError> {
            self.0.join_trees(region_id).await
        }

        async fn region_bounding_box(
            &self,
            region_id: RegionId,
        ) -> Result<BoundingBox, StoreError> {
            self.0.region_bounding_box(region_id).await
        }

        async fn trees_envelope(&self) -> Result<Option<BoundingBox>, StoreError> {
            self.0.trees_envelope().await
        }
    }

    #[async_trait]
    impl SpeciesStore for AlertlessStore {
        async fn species_by_id(&self, id: SpeciesId) -> Result<Option<Species>, StoreError> {
            self.0.species_by_id(id).await
        }

        async fn species_by_accepted_symbol(
            &self,
            symbol: &str,
        ) -> Result<Vec<Species>, StoreError> {
            self.0.species_by_accepted_symbol(symbol).await
        }
    }

    #[async_trait]
    impl TreeStore for AlertlessStore {
        async fn insert_tree(&self, tree: NewTree) -> Result<Tree, StoreError> {
            self.0.insert_tree(tree).await
        }

        async fn tree_by_id(&self, id: TreeId) -> Result<Option<Tree>, StoreError> {
            self.0.tree_by_id(id).await
        }

        async fn trees_matching(
            &self,
            predicate: &dyn TreePredicate,
        ) -> Result<Vec<Tree>, StoreError> {
            self.0.trees_matching(predicate).await
        }

        async fn get_or_create_import_event(
            &self,
            name: &str,
        ) -> Result<ImportEvent, StoreError> {
            self.0.get_or_create_import_event(name).await
        }
    }

    #[async_trait]
    impl EventStore for AlertlessStore {
        async fn append_status(&self, event: NewStatusEvent) -> Result<StatusEvent, StoreError> {
            self.0.append_status(event).await
        }

        async fn append_alert(&self, _event: NewAlertEvent) -> Result<AlertEvent, StoreError> {
            Err(StoreError::InvalidRecord {
                message: "alerts are read-only".to_string(),
            })
        }

        async fn append_action(&self, event: NewActionEvent) -> Result<ActionEvent, StoreError> {
            self.0.append_action(event).await
        }

        async fn resolve_alert(&self, id: EventId) -> Result<AlertEvent, StoreError> {
            self.0.resolve_alert(id).await
        }

        async fn events_for_tree(&self, tree_id: TreeId) -> Result<TreeEvents, StoreError> {
            self.0.events_for_tree(tree_id).await
        }
    }

    #[async_trait]
    impl ResourceStore for AlertlessStore {
        async fn metric_schema(&self) -> Result<MetricSchema, StoreError> {
            self.0.metric_schema().await
        }

        async fn resource_metrics(
            &self,
            tree_ids: &[TreeId],
        ) -> Result<Vec<ResourceMetrics>, StoreError> {
            self.0.resource_metrics(tree_ids).await
        }
    }

    #[async_trait]
    impl AggregateStore for AlertlessStore {
        async fn upsert_aggregate(&self, row: AggregateRow) -> Result<(), StoreError> {
            self.0.upsert_aggregate(row).await
        }

        async fn aggregate(
            &self,
            key: &AggregateKey,
        ) -> Result<Option<AggregateRow>, StoreError> {
            self.0.aggregate(key).await
        }

        async fn aggregates(&self) -> Result<Vec<AggregateRow>, StoreError> {
            self.0.aggregates().await
        }
    }

    #[tokio::test]
    async fn creates_tree_with_species_and_single_status() {
        let store = memory_store();
        let config = TreeMapConfig::embedded();
        let choices = ChoiceRegistry::embedded();
        let pipeline = IntakePipeline::new(&store, &config, &choices);

        let outcome = pipeline.intake(&submission(), ActorId(42)).await.unwrap();
        assert!(outcome.is_clean());

        let tree = &outcome.tree;
        assert_eq!(tree.species_id, Some(SpeciesId(5)));
        assert_eq!(tree.address_street.as_deref(), Some("1500 Market St"));
        assert_eq!(tree.geocoded_address, tree.address_street);
        assert_eq!(tree.last_updated_by, Some(ActorId(42)));
        assert!(tree.plot_type.is_none());

        let import_event = store.get_or_create_import_event("site_add").await.unwrap();
        assert_eq!(tree.import_event_id, Some(import_event.id));

        let events = store.events_for_tree(tree.id).await.unwrap();
        assert_eq!(events.statuses.len(), 1);
        assert_eq!(events.statuses[0].key, StatusKey::Dbh);
        assert_eq!(events.statuses[0].value, StatusValue::Number(12.5));
        assert_eq!(events.statuses[0].reported_by, ActorId(42));
        assert!(events.alerts.is_empty());
        assert!(events.actions.is_empty());
    }

    #[tokio::test]
    async fn outside_coordinate_persists_nothing() {
        let store = memory_store();
        let config = TreeMapConfig::embedded();
        let choices = ChoiceRegistry::embedded();
        let pipeline = IntakePipeline::new(&store, &config, &choices);

        let mut outside = submission();
        outside.longitude = Some(-80.0);
        outside.latitude = Some(35.0);

        let err = pipeline.intake(&outside, ActorId(1)).await.unwrap_err();
        assert!(matches!(
            err,
            IntakeError::Placement(PlacementError::OutOfArea { .. })
        ));
        assert!(all_trees(&store).await.is_empty());
        assert_eq!(
            store.events_for_tree(TreeId(1)).await.unwrap(),
            TreeEvents::default()
        );
    }

    #[tokio::test]
    async fn unknown_species_persists_nothing() {
        let store = memory_store();
        let config = TreeMapConfig::embedded();
        let choices = ChoiceRegistry::embedded();
        let pipeline = IntakePipeline::new(&store, &config, &choices);

        let mut unknown = submission();
        unknown.species = Some("ZZZZ,".to_string());

        assert!(matches!(
            pipeline.intake(&unknown, ActorId(1)).await,
            Err(IntakeError::Species(SpeciesError::NotFound { .. }))
        ));
        assert!(all_trees(&store).await.is_empty());
    }

    #[tokio::test]
    async fn blank_species_means_no_species() {
        let store = memory_store();
        let config = TreeMapConfig::embedded();
        let choices = ChoiceRegistry::embedded();
        let pipeline = IntakePipeline::new(&store, &config, &choices);

        let mut blank = submission();
        blank.species = Some("  ".to_string());

        let outcome = pipeline.intake(&blank, ActorId(1)).await.unwrap();
        assert!(outcome.tree.species_id.is_none());
    }

    #[tokio::test]
    async fn invalid_choice_is_rejected_before_persisting() {
        let store = memory_store();
        let config = TreeMapConfig::embedded();
        let choices = ChoiceRegistry::embedded();
        let pipeline = IntakePipeline::new(&store, &config, &choices);

        let mut bad = submission();
        bad.condition = Some("11".to_string());

        match pipeline.intake(&bad, ActorId(1)).await {
            Err(IntakeError::InvalidChoice { field, value }) => {
                assert_eq!(field, ChoiceField::Condition);
                assert_eq!(value, "11");
            }
            other => panic!("expected InvalidChoice, got {other:?}"),
        }
        assert!(all_trees(&store).await.is_empty());
    }

    #[tokio::test]
    async fn writes_every_present_event() {
        let store = memory_store();
        let config = TreeMapConfig::embedded();
        let choices = ChoiceRegistry::embedded();
        let pipeline = IntakePipeline::new(&store, &config, &choices);

        let full = Submission {
            height: Some(30.0),
            canopy_height: Some(8.0),
            sidewalk_damage: Some("2".to_string()),
            condition: Some("5".to_string()),
            canopy_condition: Some(String::new()),
            plot_type: Some("1".to_string()),
            plot_width: Some(4),
            power_lines: Some(false),
            alert: Some("needs_watering".to_string()),
            action: Some("pruned".to_string()),
            ..submission()
        };

        let outcome = pipeline.intake(&full, ActorId(7)).await.unwrap();
        assert_eq!(outcome.tree.plot_width, Some(4));
        assert_eq!(outcome.tree.powerline_conflict_potential, Some(false));

        let events = store.events_for_tree(outcome.tree.id).await.unwrap();
        let keys: Vec<StatusKey> = events.statuses.iter().map(|e| e.key).collect();
        assert_eq!(
            keys,
            vec![
                StatusKey::Height,
                StatusKey::CanopyHeight,
                StatusKey::Dbh,
                StatusKey::SidewalkDamage,
                StatusKey::Condition,
            ]
        );
        assert_eq!(events.alerts.len(), 1);
        assert!(!events.alerts[0].solved);
        assert_eq!(events.actions[0].key, "pruned");
    }

    #[tokio::test]
    async fn failed_event_becomes_warning() {
        let store = AlertlessStore(memory_store());
        let config = TreeMapConfig::embedded();
        let choices = ChoiceRegistry::embedded();
        let pipeline = IntakePipeline::new(&store, &config, &choices);

        let with_alert = Submission {
            alert: Some("needs_watering".to_string()),
            action: Some("watered".to_string()),
            ..submission()
        };

        let outcome = pipeline.intake(&with_alert, ActorId(3)).await.unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(matches!(
            &outcome.warnings[0],
            IntakeWarning::PartialEventWriteFailure { kind: EventKind::Alert, key, .. }
                if key == "needs_watering"
        ));

        let events = store.events_for_tree(outcome.tree.id).await.unwrap();
        assert_eq!(events.statuses.len(), 1);
        assert_eq!(events.actions.len(), 1);
        assert_eq!(all_trees(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn proximity_check_rejects_duplicate_location() {
        let store = memory_store();
        let mut config = TreeMapConfig::embedded();
        config.placement.proximity_check = true;
        let choices = ChoiceRegistry::embedded();
        let pipeline = IntakePipeline::new(&store, &config, &choices);

        pipeline.intake(&submission(), ActorId(1)).await.unwrap();
        assert!(matches!(
            pipeline.intake(&submission(), ActorId(1)).await,
            Err(IntakeError::Placement(PlacementError::TooClose { .. }))
        ));
        assert_eq!(all_trees(&store).await.len(), 1);
    }
}
