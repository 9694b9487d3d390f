//! Catalog storage backends.
//!
//! Two implementations of `laminx_core::CatalogStore`: an exact in-memory
//! catalog with atomic snapshot persistence, and a Postgres backend using
//! pgvector for in-database nearest-neighbor queries.

pub mod memory;
pub mod persistence;
pub mod postgres;

pub use memory::MemoryCatalog;
pub use persistence::SnapshotPersistence;
pub use postgres::{PgCatalog, PgConfig};
