//! Single-file `DuckDB` store.
//!
//! Boundaries are stored as `GeoJSON` TEXT. At open time every region and
//! tree location is loaded into the in-memory R-tree indexes, so spatial
//! queries never need a database extension; tree inserts keep the tree
//! index current. Resource metric names are whatever numeric columns the
//! `tree_resources` table has, discovered through `information_schema`.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{Connection, OptionalExt as _, params, params_from_iter};
use tokio::sync::{Mutex, RwLock};
use tree_map_aggregate_models::{AggregateKey, AggregateRow, MetricSchema, ResourceMetrics};
use tree_map_geography_models::{BoundingBox, Region, RegionId, RegionKind, RegionRef};
use tree_map_spatial::{RegionIndex, TreeIndex};
use tree_map_tree_models::events::{
    ActionEvent, AlertEvent, EventId, NewActionEvent, NewAlertEvent, NewStatusEvent, StatusEvent,
    StatusKey, StatusValue, TreeEvents,
};
use tree_map_tree_models::{
    ActorId, Coordinate, ImportEvent, ImportEventId, NewTree, Species, SpeciesId, Tree, TreeId,
};

use crate::store::{
    AggregateStore, EventStore, GeometryStore, ResourceStore, SpeciesStore, TreePredicate,
    TreeStore,
};
use crate::{DbError, StoreError};

/// Resource columns created with a fresh database. Operators may add
/// more numeric columns; they are picked up on the next read.
const DEFAULT_RESOURCE_COLUMNS: &[&str] = &[
    "annual_stormwater_management",
    "annual_electricity_conserved",
    "annual_natural_gas_conserved",
    "annual_air_quality_improvement",
    "annual_co2_sequestered",
    "total_co2_stored",
    "annual_co2_avoided",
];

/// Upper bound on ids inlined into one `IN (...)` list.
const ID_CHUNK_SIZE: usize = 500;

const TREE_COLUMNS: &str = "id, longitude, latitude, address_street, address_city, address_zip, \
     geocoded_address, species_id, plot_width, plot_length, plot_type, \
     powerline_conflict_potential, import_event_id, last_updated_by";

const SPECIES_COLUMNS: &str =
    "id, symbol, accepted_symbol, cultivar_name, scientific_name, common_name";

struct RegionCache {
    regions: Vec<Region>,
    index: RegionIndex,
}

impl RegionCache {
    fn build(regions: Vec<Region>) -> Self {
        let index = RegionIndex::build(&regions);
        Self { regions, index }
    }
}

/// A [`crate::Store`] backed by a `DuckDB` file.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    regions: RwLock<RegionCache>,
    trees: RwLock<TreeIndex>,
}

impl DuckDbStore {
    /// Opens (or creates) the database file and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the directory, connection, or schema cannot
    /// be created, or stored rows cannot be loaded.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        crate::paths::ensure_parent_dir(path)?;
        let conn = Connection::open(path)?;
        log::info!("Opened tree map database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Opens a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema cannot be created.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;

        let regions = load_regions(&conn)?;
        let points = load_tree_points(&conn)?;
        log::info!(
            "Loaded {} regions and {} tree locations",
            regions.len(),
            points.len()
        );

        Ok(Self {
            conn: Mutex::new(conn),
            regions: RwLock::new(RegionCache::build(regions)),
            trees: RwLock::new(TreeIndex::build(points)),
        })
    }

    /// Inserts or replaces region boundaries and rebuilds the region
    /// index. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any write fails; no rows are written then.
    pub async fn upsert_regions(&self, regions: &[Region]) -> Result<usize, DbError> {
        let reloaded = {
            let mut conn = self.conn.lock().await;
            let tx = conn.transaction()?;
            for region in regions {
                tx.execute(
                    "INSERT OR REPLACE INTO regions (id, kind, name, boundary_geojson)
                     VALUES (?, ?, ?, ?)",
                    params![
                        region.id.0,
                        region.kind.as_ref(),
                        region.name,
                        region.boundary_geojson
                    ],
                )?;
            }
            tx.commit()?;
            load_regions(&conn)?
        };

        *self.regions.write().await = RegionCache::build(reloaded);
        Ok(regions.len())
    }

    /// Largest stored region id, or zero when there are none.
    pub async fn max_region_id(&self) -> i64 {
        let cache = self.regions.read().await;
        cache.regions.iter().map(|r| r.id.0).max().unwrap_or(0)
    }

    /// Inserts or replaces species reference rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any write fails; no rows are written then.
    pub async fn upsert_species(&self, species: &[Species]) -> Result<usize, DbError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for row in species {
            tx.execute(
                "INSERT OR REPLACE INTO species
                 (id, symbol, accepted_symbol, cultivar_name, scientific_name, common_name)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    row.id.0,
                    row.symbol,
                    row.accepted_symbol,
                    row.cultivar_name,
                    row.scientific_name,
                    row.common_name
                ],
            )?;
        }
        tx.commit()?;
        Ok(species.len())
    }

    /// Replaces per-tree resource records. A stored record is replaced as
    /// a whole: metrics missing from the new record become absent. Values
    /// for names that are not columns of `tree_resources` are dropped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any write fails; no rows are written then.
    pub async fn upsert_resources(&self, records: &[ResourceMetrics]) -> Result<usize, DbError> {
        let mut conn = self.conn.lock().await;
        let schema = metric_columns(&conn)?;
        let tx = conn.transaction()?;

        for record in records {
            let mut columns = vec!["tree_id".to_string()];
            let mut values = Vec::new();
            for (name, value) in &record.values {
                if schema.contains(name) {
                    columns.push(quote_ident(name));
                    values.push(*value);
                } else {
                    log::warn!(
                        "Tree {}: dropping value for unknown resource metric {name}",
                        record.tree_id
                    );
                }
            }

            tx.execute(
                "DELETE FROM tree_resources WHERE tree_id = ?",
                params![record.tree_id.0],
            )?;

            let placeholders: String = values.iter().map(|_| ", ?").collect();
            let sql = format!(
                "INSERT INTO tree_resources ({}) VALUES ({}{placeholders})",
                columns.join(", "),
                record.tree_id.0
            );
            tx.execute(&sql, params_from_iter(values))?;
        }

        tx.commit()?;
        Ok(records.len())
    }
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS regions (
            id BIGINT PRIMARY KEY,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            boundary_geojson TEXT
        );

        CREATE TABLE IF NOT EXISTS species (
            id BIGINT PRIMARY KEY,
            symbol TEXT NOT NULL,
            accepted_symbol TEXT NOT NULL,
            cultivar_name TEXT,
            scientific_name TEXT NOT NULL,
            common_name TEXT
        );

        CREATE SEQUENCE IF NOT EXISTS import_events_id_seq START 1;

        CREATE TABLE IF NOT EXISTS import_events (
            id BIGINT PRIMARY KEY DEFAULT nextval('import_events_id_seq'),
            name TEXT NOT NULL UNIQUE
        );

        CREATE SEQUENCE IF NOT EXISTS trees_id_seq START 1;

        CREATE TABLE IF NOT EXISTS trees (
            id BIGINT PRIMARY KEY DEFAULT nextval('trees_id_seq'),
            longitude DOUBLE NOT NULL,
            latitude DOUBLE NOT NULL,
            address_street TEXT,
            address_city TEXT,
            address_zip TEXT,
            geocoded_address TEXT,
            species_id BIGINT,
            plot_width INTEGER,
            plot_length INTEGER,
            plot_type TEXT,
            powerline_conflict_potential BOOLEAN,
            import_event_id BIGINT,
            last_updated_by BIGINT
        );

        CREATE SEQUENCE IF NOT EXISTS tree_status_id_seq START 1;

        CREATE TABLE IF NOT EXISTS tree_status (
            id BIGINT PRIMARY KEY DEFAULT nextval('tree_status_id_seq'),
            tree_id BIGINT NOT NULL,
            reported_by BIGINT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            reported_at TEXT NOT NULL
        );

        CREATE SEQUENCE IF NOT EXISTS tree_alerts_id_seq START 1;

        CREATE TABLE IF NOT EXISTS tree_alerts (
            id BIGINT PRIMARY KEY DEFAULT nextval('tree_alerts_id_seq'),
            tree_id BIGINT NOT NULL,
            reported_by BIGINT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            solved BOOLEAN NOT NULL DEFAULT false
        );

        CREATE SEQUENCE IF NOT EXISTS tree_actions_id_seq START 1;

        CREATE TABLE IF NOT EXISTS tree_actions (
            id BIGINT PRIMARY KEY DEFAULT nextval('tree_actions_id_seq'),
            tree_id BIGINT NOT NULL,
            reported_by BIGINT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS aggregates (
            aggregate_key TEXT PRIMARY KEY,
            region_kind TEXT,
            region_id BIGINT,
            search_key TEXT,
            total_trees BIGINT NOT NULL,
            distinct_species BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS aggregate_metrics (
            aggregate_key TEXT NOT NULL,
            metric TEXT NOT NULL,
            value DOUBLE NOT NULL
        );",
    )?;

    let resources = format!(
        "CREATE TABLE IF NOT EXISTS tree_resources (tree_id BIGINT PRIMARY KEY{});",
        DEFAULT_RESOURCE_COLUMNS
            .iter()
            .map(|column| format!(", {column} DOUBLE"))
            .collect::<String>()
    );
    conn.execute_batch(&resources)?;

    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn id_list(ids: &[i64]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn load_regions(conn: &Connection) -> Result<Vec<Region>, DbError> {
    let mut stmt =
        conn.prepare("SELECT id, kind, name, boundary_geojson FROM regions ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut regions = Vec::with_capacity(rows.len());
    for (id, kind, name, boundary) in rows {
        let Ok(kind) = kind.parse::<RegionKind>() else {
            log::warn!("Region {id} ({name}) has unknown kind {kind:?}, skipping");
            continue;
        };
        regions.push(Region {
            id: RegionId(id),
            kind,
            name,
            boundary_geojson: boundary.unwrap_or_default(),
        });
    }

    Ok(regions)
}

fn load_tree_points(conn: &Connection) -> Result<Vec<(TreeId, Coordinate)>, DbError> {
    let mut stmt = conn.prepare("SELECT id, longitude, latitude FROM trees")?;
    let points = stmt
        .query_map([], |row| {
            Ok((
                TreeId(row.get(0)?),
                Coordinate {
                    longitude: row.get(1)?,
                    latitude: row.get(2)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(points)
}

fn tree_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Tree> {
    Ok(Tree {
        id: TreeId(row.get(0)?),
        coordinate: Coordinate {
            longitude: row.get(1)?,
            latitude: row.get(2)?,
        },
        address_street: row.get(3)?,
        address_city: row.get(4)?,
        address_zip: row.get(5)?,
        geocoded_address: row.get(6)?,
        species_id: row.get::<_, Option<i64>>(7)?.map(SpeciesId),
        plot_width: row.get(8)?,
        plot_length: row.get(9)?,
        plot_type: row.get(10)?,
        powerline_conflict_potential: row.get(11)?,
        import_event_id: row.get::<_, Option<i64>>(12)?.map(ImportEventId),
        last_updated_by: row.get::<_, Option<i64>>(13)?.map(ActorId),
    })
}

fn species_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Species> {
    Ok(Species {
        id: SpeciesId(row.get(0)?),
        symbol: row.get(1)?,
        accepted_symbol: row.get(2)?,
        cultivar_name: row.get(3)?,
        scientific_name: row.get(4)?,
        common_name: row.get(5)?,
    })
}

fn fetch_trees(conn: &Connection, ids: &[TreeId]) -> Result<Vec<Tree>, DbError> {
    let mut trees = Vec::with_capacity(ids.len());
    let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();

    for chunk in raw.chunks(ID_CHUNK_SIZE) {
        let sql = format!(
            "SELECT {TREE_COLUMNS} FROM trees WHERE id IN ({}) ORDER BY id",
            id_list(chunk)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], tree_from_row)?;
        for tree in rows {
            trees.push(tree?);
        }
    }

    trees.sort_by_key(|tree| tree.id);
    Ok(trees)
}

fn metric_columns(conn: &Connection) -> Result<MetricSchema, DbError> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns
         WHERE table_name = 'tree_resources'
           AND column_name <> 'tree_id'
           AND (data_type IN ('DOUBLE', 'FLOAT', 'REAL', 'INTEGER', 'BIGINT', 'SMALLINT',
                              'TINYINT', 'HUGEINT', 'UBIGINT', 'UINTEGER', 'USMALLINT',
                              'UTINYINT')
                OR data_type LIKE 'DECIMAL%')
         ORDER BY ordinal_position",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MetricSchema::new(names))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Conversion {
            message: format!("invalid timestamp {raw:?}: {e}"),
        })
}

fn parse_status_key(raw: &str) -> Result<StatusKey, DbError> {
    raw.parse().map_err(|_| DbError::Conversion {
        message: format!("unknown status key {raw:?}"),
    })
}

fn status_value(key: StatusKey, raw: String) -> Result<StatusValue, DbError> {
    if !key.is_numeric() {
        return Ok(StatusValue::Code(raw));
    }
    raw.parse::<f64>()
        .map(StatusValue::Number)
        .map_err(|e| DbError::Conversion {
            message: format!("status {key} has non-numeric value {raw:?}: {e}"),
        })
}

fn to_i64(value: u64, what: &str) -> Result<i64, DbError> {
    i64::try_from(value).map_err(|_| DbError::Conversion {
        message: format!("{what} {value} does not fit in BIGINT"),
    })
}

#[allow(clippy::cast_sign_loss)]
const fn to_u64(value: i64) -> u64 {
    if value < 0 { 0 } else { value as u64 }
}

fn write_aggregate(conn: &mut Connection, row: &AggregateRow) -> Result<(), DbError> {
    let storage_key = row.key.storage_key();
    let (region_kind, region_id, search_key) = match &row.key {
        AggregateKey::Region { kind, region_id } => {
            (Some(kind.as_ref().to_string()), Some(region_id.0), None)
        }
        AggregateKey::Search { key } => (None, None, Some(key.clone())),
    };

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO aggregates
         (aggregate_key, region_kind, region_id, search_key, total_trees, distinct_species)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            storage_key,
            region_kind,
            region_id,
            search_key,
            to_i64(row.total_trees, "total_trees")?,
            to_i64(row.distinct_species, "distinct_species")?
        ],
    )?;
    tx.execute(
        "DELETE FROM aggregate_metrics WHERE aggregate_key = ?",
        params![storage_key],
    )?;
    for (metric, value) in &row.metrics {
        tx.execute(
            "INSERT INTO aggregate_metrics (aggregate_key, metric, value) VALUES (?, ?, ?)",
            params![storage_key, metric, value],
        )?;
    }
    tx.commit()?;

    Ok(())
}

type AggregateHeader = (String, Option<String>, Option<i64>, Option<String>, i64, i64);

fn aggregate_header(row: &duckdb::Row<'_>) -> duckdb::Result<AggregateHeader> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn read_aggregates(conn: &Connection, filter: Option<&str>) -> Result<Vec<AggregateRow>, DbError> {
    let sql = "SELECT aggregate_key, region_kind, region_id, search_key, total_trees, \
               distinct_species FROM aggregates";
    let raw = if let Some(key) = filter {
        let mut stmt = conn.prepare(&format!("{sql} WHERE aggregate_key = ?"))?;
        stmt.query_map(params![key], aggregate_header)?
            .collect::<Result<Vec<_>, _>>()?
    } else {
        let mut stmt = conn.prepare(&format!("{sql} ORDER BY aggregate_key"))?;
        stmt.query_map([], aggregate_header)?
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut metrics_stmt =
        conn.prepare("SELECT metric, value FROM aggregate_metrics WHERE aggregate_key = ?")?;

    let mut rows = Vec::with_capacity(raw.len());
    for (storage_key, region_kind, region_id, search_key, total, distinct) in raw {
        let key = match (region_kind, region_id, search_key) {
            (Some(kind), Some(id), _) => AggregateKey::Region {
                kind: kind.parse().map_err(|_| DbError::Conversion {
                    message: format!("aggregate {storage_key} has unknown region kind {kind:?}"),
                })?,
                region_id: RegionId(id),
            },
            (_, _, Some(key)) => AggregateKey::Search { key },
            _ => {
                return Err(DbError::Conversion {
                    message: format!("aggregate {storage_key} has no region or search key"),
                });
            }
        };

        let metrics = metrics_stmt
            .query_map(params![storage_key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        rows.push(AggregateRow {
            key,
            total_trees: to_u64(total),
            distinct_species: to_u64(distinct),
            metrics,
        });
    }

    rows.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(rows)
}

#[async_trait]
impl GeometryStore for DuckDbStore {
    async fn regions(&self, kind: RegionKind) -> Result<Vec<Region>, StoreError> {
        let cache = self.regions.read().await;
        Ok(cache
            .regions
            .iter()
            .filter(|region| region.kind == kind)
            .cloned()
            .collect())
    }

    async fn containing_regions(
        &self,
        coordinate: Coordinate,
        kind: RegionKind,
    ) -> Result<Vec<RegionRef>, StoreError> {
        let cache = self.regions.read().await;
        Ok(cache
            .index
            .containing(coordinate.longitude, coordinate.latitude, kind))
    }

    async fn trees_within(
        &self,
        coordinate: Coordinate,
        radius_meters: f64,
    ) -> Result<Vec<Tree>, StoreError> {
        let ids = self
            .trees
            .read()
            .await
            .within_distance(coordinate, radius_meters);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        Ok(fetch_trees(&conn, &ids)?)
    }

    async fn join_trees(&self, region_id: RegionId) -> Result<Vec<Tree>, StoreError> {
        let ids = {
            let cache = self.regions.read().await;
            self.trees
                .read()
                .await
                .within_region(&cache.index, region_id)?
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        Ok(fetch_trees(&conn, &ids)?)
    }

    async fn region_bounding_box(&self, region_id: RegionId) -> Result<BoundingBox, StoreError> {
        Ok(self.regions.read().await.index.bounding_box(region_id)?)
    }

    async fn trees_envelope(&self) -> Result<Option<BoundingBox>, StoreError> {
        Ok(self.trees.read().await.envelope())
    }
}

#[async_trait]
impl SpeciesStore for DuckDbStore {
    async fn species_by_id(&self, id: SpeciesId) -> Result<Option<Species>, StoreError> {
        let conn = self.conn.lock().await;
        let species = conn
            .query_row(
                &format!("SELECT {SPECIES_COLUMNS} FROM species WHERE id = ?"),
                params![id.0],
                species_from_row,
            )
            .optional()?;
        Ok(species)
    }

    async fn species_by_accepted_symbol(
        &self,
        symbol: &str,
    ) -> Result<Vec<Species>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SPECIES_COLUMNS} FROM species WHERE accepted_symbol = ? ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![symbol], species_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl TreeStore for DuckDbStore {
    async fn insert_tree(&self, tree: NewTree) -> Result<Tree, StoreError> {
        let coordinate = tree.coordinate.ok_or_else(|| StoreError::InvalidRecord {
            message: "tree has no coordinate".to_string(),
        })?;

        let id: i64 = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "INSERT INTO trees (longitude, latitude, address_street, address_city,
                     address_zip, geocoded_address, species_id, plot_width, plot_length,
                     plot_type, powerline_conflict_potential, import_event_id, last_updated_by)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 RETURNING id",
                params![
                    coordinate.longitude,
                    coordinate.latitude,
                    tree.address_street,
                    tree.address_city,
                    tree.address_zip,
                    tree.geocoded_address,
                    tree.species_id.map(|s| s.0),
                    tree.plot_width,
                    tree.plot_length,
                    tree.plot_type,
                    tree.powerline_conflict_potential,
                    tree.import_event_id.map(|e| e.0),
                    tree.last_updated_by.map(|a| a.0)
                ],
                |row| row.get(0),
            )?
        };

        let id = TreeId(id);
        self.trees.write().await.insert(id, coordinate);
        log::debug!("Inserted tree {id}");

        Tree::from_new(id, tree).ok_or_else(|| StoreError::InvalidRecord {
            message: "tree has no coordinate".to_string(),
        })
    }

    async fn tree_by_id(&self, id: TreeId) -> Result<Option<Tree>, StoreError> {
        let conn = self.conn.lock().await;
        let tree = conn
            .query_row(
                &format!("SELECT {TREE_COLUMNS} FROM trees WHERE id = ?"),
                params![id.0],
                tree_from_row,
            )
            .optional()?;
        Ok(tree)
    }

    async fn trees_matching(
        &self,
        predicate: &dyn TreePredicate,
    ) -> Result<Vec<Tree>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {TREE_COLUMNS} FROM trees ORDER BY id"))?;
        let mut matched = Vec::new();
        for tree in stmt.query_map([], tree_from_row)? {
            let tree = tree?;
            if predicate.matches(&tree) {
                matched.push(tree);
            }
        }
        Ok(matched)
    }

    async fn get_or_create_import_event(&self, name: &str) -> Result<ImportEvent, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO import_events (name) VALUES (?) ON CONFLICT (name) DO NOTHING",
            params![name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM import_events WHERE name = ?",
            params![name],
            |row| row.get(0),
        )?;
        Ok(ImportEvent {
            id: ImportEventId(id),
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl EventStore for DuckDbStore {
    async fn append_status(&self, event: NewStatusEvent) -> Result<StatusEvent, StoreError> {
        let conn = self.conn.lock().await;
        let id: i64 = conn.query_row(
            "INSERT INTO tree_status (tree_id, reported_by, key, value, reported_at)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
            params![
                event.tree_id.0,
                event.reported_by.0,
                event.key.as_ref(),
                event.value.to_string(),
                event.reported_at.to_rfc3339()
            ],
            |row| row.get(0),
        )?;
        Ok(StatusEvent {
            id: EventId(id),
            tree_id: event.tree_id,
            reported_by: event.reported_by,
            key: event.key,
            value: event.value,
            reported_at: event.reported_at,
        })
    }

    async fn append_alert(&self, event: NewAlertEvent) -> Result<AlertEvent, StoreError> {
        let conn = self.conn.lock().await;
        let id: i64 = conn.query_row(
            "INSERT INTO tree_alerts (tree_id, reported_by, key, value, solved)
             VALUES (?, ?, ?, ?, false) RETURNING id",
            params![
                event.tree_id.0,
                event.reported_by.0,
                event.key,
                event.value.to_rfc3339()
            ],
            |row| row.get(0),
        )?;
        Ok(AlertEvent {
            id: EventId(id),
            tree_id: event.tree_id,
            reported_by: event.reported_by,
            key: event.key,
            value: event.value,
            solved: false,
        })
    }

    async fn append_action(&self, event: NewActionEvent) -> Result<ActionEvent, StoreError> {
        let conn = self.conn.lock().await;
        let id: i64 = conn.query_row(
            "INSERT INTO tree_actions (tree_id, reported_by, key, value)
             VALUES (?, ?, ?, ?) RETURNING id",
            params![
                event.tree_id.0,
                event.reported_by.0,
                event.key,
                event.value.to_rfc3339()
            ],
            |row| row.get(0),
        )?;
        Ok(ActionEvent {
            id: EventId(id),
            tree_id: event.tree_id,
            reported_by: event.reported_by,
            key: event.key,
            value: event.value,
        })
    }

    async fn resolve_alert(&self, id: EventId) -> Result<AlertEvent, StoreError> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                "UPDATE tree_alerts SET solved = true WHERE id = ?
                 RETURNING tree_id, reported_by, key, value",
                params![id.0],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let (tree_id, reported_by, key, value) = raw.ok_or_else(|| StoreError::NotFound {
            entity: "alert",
            id: id.0.to_string(),
        })?;

        Ok(AlertEvent {
            id,
            tree_id: TreeId(tree_id),
            reported_by: ActorId(reported_by),
            key,
            value: parse_timestamp(&value)?,
            solved: true,
        })
    }

    async fn events_for_tree(&self, tree_id: TreeId) -> Result<TreeEvents, StoreError> {
        let conn = self.conn.lock().await;
        let mut events = TreeEvents::default();

        let mut stmt = conn.prepare(
            "SELECT id, reported_by, key, value, reported_at FROM tree_status
             WHERE tree_id = ? ORDER BY id",
        )?;
        let statuses = stmt
            .query_map(params![tree_id.0], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (id, reported_by, key, value, reported_at) in statuses {
            let key = parse_status_key(&key)?;
            events.statuses.push(StatusEvent {
                id: EventId(id),
                tree_id,
                reported_by: ActorId(reported_by),
                key,
                value: status_value(key, value)?,
                reported_at: parse_timestamp(&reported_at)?,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT id, reported_by, key, value, solved FROM tree_alerts
             WHERE tree_id = ? ORDER BY id",
        )?;
        let alerts = stmt
            .query_map(params![tree_id.0], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (id, reported_by, key, value, solved) in alerts {
            events.alerts.push(AlertEvent {
                id: EventId(id),
                tree_id,
                reported_by: ActorId(reported_by),
                key,
                value: parse_timestamp(&value)?,
                solved,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT id, reported_by, key, value FROM tree_actions
             WHERE tree_id = ? ORDER BY id",
        )?;
        let actions = stmt
            .query_map(params![tree_id.0], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (id, reported_by, key, value) in actions {
            events.actions.push(ActionEvent {
                id: EventId(id),
                tree_id,
                reported_by: ActorId(reported_by),
                key,
                value: parse_timestamp(&value)?,
            });
        }

        Ok(events)
    }
}

#[async_trait]
impl ResourceStore for DuckDbStore {
    async fn metric_schema(&self) -> Result<MetricSchema, StoreError> {
        let conn = self.conn.lock().await;
        Ok(metric_columns(&conn)?)
    }

    async fn resource_metrics(
        &self,
        tree_ids: &[TreeId],
    ) -> Result<Vec<ResourceMetrics>, StoreError> {
        if tree_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().await;
        let schema = metric_columns(&conn)?;
        let select: Vec<String> = schema
            .names()
            .iter()
            .map(|name| format!("CAST({} AS DOUBLE)", quote_ident(name)))
            .collect();

        let raw: Vec<i64> = tree_ids.iter().map(|id| id.0).collect();
        let mut records = Vec::new();

        for chunk in raw.chunks(ID_CHUNK_SIZE) {
            let sql = format!(
                "SELECT tree_id{} FROM tree_resources WHERE tree_id IN ({}) ORDER BY tree_id",
                select
                    .iter()
                    .map(|column| format!(", {column}"))
                    .collect::<String>(),
                id_list(chunk)
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let tree_id = TreeId(row.get(0)?);
                let mut values = BTreeMap::new();
                for (i, name) in schema.names().iter().enumerate() {
                    if let Some(value) = row.get::<_, Option<f64>>(i + 1)? {
                        values.insert(name.clone(), value);
                    }
                }
                records.push(ResourceMetrics { tree_id, values });
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl AggregateStore for DuckDbStore {
    async fn upsert_aggregate(&self, row: AggregateRow) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        write_aggregate(&mut conn, &row)?;
        Ok(())
    }

    async fn aggregate(&self, key: &AggregateKey) -> Result<Option<AggregateRow>, StoreError> {
        let conn = self.conn.lock().await;
        let storage_key = key.storage_key();
        Ok(read_aggregates(&conn, Some(&storage_key))?.into_iter().next())
    }

    async fn aggregates(&self) -> Result<Vec<AggregateRow>, StoreError> {
        let conn = self.conn.lock().await;
        Ok(read_aggregates(&conn, None)?)
    }
}
