//! Catalog storage seam.
//!
//! The pipeline is storage-agnostic: ingestion inserts [`LaminateSegment`]
//! records and search runs nearest-neighbor queries, both through
//! [`CatalogStore`]. `laminx-storage` provides the in-memory and Postgres
//! implementations.

use async_trait::async_trait;

use crate::error::Result;
use crate::segment::{LaminateSegment, SegmentSummary};
use crate::Embedding;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert one catalog record.
    ///
    /// Fails with [`crate::Error::StoreConflict`] when a record with the same
    /// `(laminate_id, segment_num)` key or the same `image_url` already
    /// exists, and with [`crate::Error::InvalidDimension`] when the embedding
    /// dimensionality does not match the store's.
    async fn insert(&self, segment: LaminateSegment) -> Result<()>;

    /// Records within `max_distance` (cosine) of `query`, ascending by
    /// distance, at most `limit` of them.
    async fn nearest(
        &self,
        query: &Embedding,
        max_distance: f32,
        limit: usize,
    ) -> Result<Vec<(SegmentSummary, f32)>>;

    /// The main (`segment_num == 0`) record for a laminate, if present.
    async fn fetch_main(&self, laminate_id: i64) -> Result<Option<SegmentSummary>>;

    /// Whether any record references `image_url`. Used to skip re-ingesting
    /// images the catalog already holds.
    async fn contains_image(&self, image_url: &str) -> Result<bool>;
}
