#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Persistence for the tree map.
//!
//! The [`store`] module defines the async traits every component reads
//! and writes through. Two adapters implement them:
//!
//! * [`MemoryStore`], which keeps everything in process behind a
//!   `tokio` read/write lock, used by tests and embedding callers.
//! * [`DuckDbStore`], a single `DuckDB` file. Boundaries are kept as
//!   `GeoJSON` TEXT and indexed in Rust at open time, so no spatial
//!   extension is required.

pub mod boundaries;
pub mod duckdb_store;
pub mod memory;
pub mod paths;
pub mod store;

pub use duckdb_store::DuckDbStore;
pub use memory::MemoryStore;
pub use store::{
    AggregateStore, EventStore, GeometryStore, ResourceStore, SpeciesStore, Store, TreePredicate,
    TreeStore,
};

use tree_map_spatial::GeometryError;

/// Errors raised by the `DuckDB` adapter itself.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Filesystem error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Errors returned through the store traits.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing database failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Region geometry could not be used.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// A referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record (e.g. `"tree"`).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The record handed to the store is incomplete.
    #[error("Invalid record: {message}")]
    InvalidRecord {
        /// Description of what is missing.
        message: String,
    },
}

impl From<duckdb::Error> for StoreError {
    fn from(e: duckdb::Error) -> Self {
        Self::Db(DbError::Database(e))
    }
}
