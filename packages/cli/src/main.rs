#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line shell for the tree map inventory.
//!
//! Opens the `DuckDB` store named by the configuration and runs one
//! operation per invocation: intake of a JSON submission, placement and
//! species checks, aggregate recomputation, and reference data loading.
//!
//! Uses `indicatif-log-bridge` (via [`tree_map_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use tree_map_aggregate::progress::ProgressCallback as _;
use tree_map_aggregate::{Materializer, SavedSearch};
use tree_map_aggregate_models::{RecomputeReport, ResourceMetrics};
use tree_map_cli_utils::{IndicatifProgress, MultiProgress};
use tree_map_config::{ChoiceRegistry, TreeMapConfig};
use tree_map_database::boundaries::{normalize_features, parse_feature_collection};
use tree_map_database::{DuckDbStore, ResourceStore as _};
use tree_map_geography_models::RegionKind;
use tree_map_intake::IntakePipeline;
use tree_map_intake_models::Submission;
use tree_map_placement::PlacementValidator;
use tree_map_species::SpeciesResolver;
use tree_map_tree_models::{ActorId, Species, SpeciesId, Tree};

#[derive(Parser)]
#[command(name = "tree_map", about = "Street tree inventory tool")]
struct Cli {
    /// TOML file overlaid on the built-in configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and store a tree submission read from a JSON file
    Intake {
        /// Submission JSON file
        file: PathBuf,
        /// Submitting user id
        #[arg(long, default_value = "0")]
        actor: i64,
    },
    /// Check whether a tree may be placed at a location
    Validate {
        /// Longitude (WGS84)
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
        /// Latitude (WGS84)
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
    },
    /// Resolve a species id or "symbol,cultivar" token
    ResolveSpecies {
        /// Species token (e.g., "QUAL," or "ACRU,Red Sunset")
        token: String,
    },
    /// Recompute region aggregates and the default search aggregate
    Recompute {
        /// Comma-separated region kinds (defaults to the configured list)
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<RegionKind>,
    },
    /// Recompute the aggregate of one search
    SearchAggregate {
        /// Stored search key
        #[arg(long, default_value = "")]
        key: String,
        /// Only count trees of this species
        #[arg(long)]
        species: Option<i64>,
    },
    /// Load region boundaries from a `GeoJSON` `FeatureCollection`
    LoadRegions {
        /// `GeoJSON` file
        file: PathBuf,
        /// Region kind of every feature in the file
        #[arg(long)]
        kind: RegionKind,
        /// Feature property holding the region name
        #[arg(long, default_value = "name")]
        name_field: String,
    },
    /// Load species reference rows from a JSON array
    LoadSpecies {
        /// Species JSON file
        file: PathBuf,
    },
    /// Load per-tree resource metrics from a JSON array
    LoadResources {
        /// Resource metrics JSON file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = tree_map_cli_utils::init_logger();
    let cli = Cli::parse();

    let config = TreeMapConfig::load(cli.config.as_deref())?;
    let store = DuckDbStore::open(&config.database.path)?;
    log::debug!("Opened store at {}", config.database.path.display());

    match cli.command {
        Commands::Intake { file, actor } => {
            let submission: Submission = serde_json::from_str(&read(&file)?)?;
            let choices = ChoiceRegistry::embedded();
            let outcome = IntakePipeline::new(&store, &config, &choices)
                .intake(&submission, ActorId(actor))
                .await?;

            for warning in &outcome.warnings {
                log::warn!("Tree {}: {warning}", outcome.tree.id);
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Validate {
            longitude,
            latitude,
        } => {
            let placement = PlacementValidator::new(&store, &config.placement)
                .validate(Some(longitude), Some(latitude))
                .await?;
            for region in &placement.regions {
                println!("{:<8} {}", region.id, region.name);
            }
        }
        Commands::ResolveSpecies { token } => {
            let id = SpeciesResolver::new(&store, config.species.ambiguity)
                .resolve(&token, None)
                .await?;
            println!("{id}");
        }
        Commands::Recompute { kinds } => {
            let kinds = if kinds.is_empty() {
                config.materializer.region_kinds.clone()
            } else {
                kinds
            };
            recompute(&store, &config, &kinds, &multi).await?;
        }
        Commands::SearchAggregate { key, species } => {
            let schema = store.metric_schema().await?;
            let materializer =
                Materializer::new(&store, schema, config.materializer.concurrency);
            let row = match species.map(SpeciesId) {
                Some(species) => {
                    let predicate = move |tree: &Tree| tree.species_id == Some(species);
                    materializer
                        .recompute_search_aggregate(&key, &predicate)
                        .await?
                }
                None => {
                    materializer
                        .recompute_search_aggregate(&key, &|_: &Tree| true)
                        .await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
        Commands::LoadRegions {
            file,
            kind,
            name_field,
        } => {
            let features = parse_feature_collection(&read(&file)?)?;
            let first_id = store.max_region_id().await + 1;
            let regions = normalize_features(&features, &name_field, kind, first_id);
            let count = store.upsert_regions(&regions).await?;
            log::info!(
                "Loaded {count} {kind} region(s) from {} feature(s)",
                features.len()
            );
        }
        Commands::LoadSpecies { file } => {
            let species: Vec<Species> = serde_json::from_str(&read(&file)?)?;
            let count = store.upsert_species(&species).await?;
            log::info!("Loaded {count} species");
        }
        Commands::LoadResources { file } => {
            let records: Vec<ResourceMetrics> = serde_json::from_str(&read(&file)?)?;
            let count = store.upsert_resources(&records).await?;
            log::info!("Loaded resource metrics for {count} tree(s)");
        }
    }

    Ok(())
}

fn read(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()).into())
}

async fn recompute(
    store: &DuckDbStore,
    config: &TreeMapConfig,
    kinds: &[RegionKind],
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let schema = store.metric_schema().await?;
    log::info!(
        "Summing {} metric(s): {}",
        schema.len(),
        schema.names().join(", ")
    );

    let steps = IndicatifProgress::kinds_bar(multi, kinds.len() as u64);
    let mut reports: Vec<RecomputeReport> = Vec::with_capacity(kinds.len());

    for &kind in kinds {
        let progress = IndicatifProgress::regions_bar(multi, kind.as_ref());
        let report = Materializer::new(store, schema.clone(), config.materializer.concurrency)
            .with_progress(progress)
            .recompute(kind)
            .await?;
        steps.inc(1);
        reports.push(report);
    }
    steps.finish("Region kinds done".to_string());

    Materializer::new(store, schema, config.materializer.concurrency)
        .recompute_saved_searches(&[SavedSearch::all_trees()])
        .await?;

    let mut failed = 0;
    for report in &reports {
        println!(
            "{:<14} {:>6} written {:>4} failed",
            report.kind.as_ref(),
            report.succeeded,
            report.failed.len()
        );
        for failure in &report.failed {
            println!(
                "  {} ({}): {}",
                failure.region_id, failure.region_name, failure.reason
            );
        }
        failed += report.failed.len();
    }

    log::info!(
        "Recompute complete in {:.1}s ({failed} region(s) failed)",
        start.elapsed().as_secs_f64()
    );

    Ok(())
}
