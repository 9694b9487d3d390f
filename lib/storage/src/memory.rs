//! In-memory catalog with optional snapshot persistence.
//!
//! Suited to single-node deployments and tests: records live in a locked
//! vector, nearest-neighbor queries are exact linear scans. With a data
//! directory attached, every insert is followed by an atomic full-catalog
//! snapshot so restarts pick up where they left off.

use std::cmp::Ordering;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use laminx_core::{
    CatalogStore, Embedding, Error, LaminateSegment, Result, SegmentSummary, MAIN_SEGMENT,
};

use crate::persistence::SnapshotPersistence;

pub struct MemoryCatalog {
    dim: usize,
    segments: RwLock<Vec<LaminateSegment>>,
    persistence: Option<SnapshotPersistence>,
}

impl MemoryCatalog {
    /// Ephemeral catalog, nothing written to disk.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            segments: RwLock::new(Vec::new()),
            persistence: None,
        }
    }

    /// Catalog backed by a snapshot file under `dir`, loading any existing
    /// snapshot.
    pub fn open(dim: usize, dir: &Path) -> Result<Self> {
        let persistence = SnapshotPersistence::open(dir)?;
        let segments = persistence.load(dim)?;
        info!(
            records = segments.len(),
            path = %dir.display(),
            "catalog snapshot loaded"
        );
        Ok(Self {
            dim,
            segments: RwLock::new(segments),
            persistence: Some(persistence),
        })
    }

    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn insert(&self, segment: LaminateSegment) -> Result<()> {
        if segment.embedding.dim() != self.dim {
            return Err(Error::InvalidDimension {
                expected: self.dim,
                actual: segment.embedding.dim(),
            });
        }

        let mut segments = self.segments.write();
        if segments
            .iter()
            .any(|s| s.laminate_id == segment.laminate_id && s.segment_num == segment.segment_num)
        {
            return Err(Error::StoreConflict(format!(
                "record for laminate {} segment {} already exists",
                segment.laminate_id, segment.segment_num
            )));
        }
        if segments.iter().any(|s| s.image_url == segment.image_url) {
            return Err(Error::StoreConflict(format!(
                "image {} is already cataloged",
                segment.image_url
            )));
        }

        segments.push(segment);
        if let Some(persistence) = &self.persistence {
            // snapshot while holding the write lock so inserts serialize
            // against their own persistence
            persistence.save(self.dim, &segments)?;
        }
        Ok(())
    }

    async fn nearest(
        &self,
        query: &Embedding,
        max_distance: f32,
        limit: usize,
    ) -> Result<Vec<(SegmentSummary, f32)>> {
        if query.dim() != self.dim {
            return Err(Error::InvalidDimension {
                expected: self.dim,
                actual: query.dim(),
            });
        }

        let segments = self.segments.read();
        let mut hits: Vec<(SegmentSummary, f32)> = segments
            .iter()
            .map(|s| (s.summary(), query.cosine_distance(&s.embedding)))
            .filter(|(_, d)| *d <= max_distance)
            .collect();
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch_main(&self, laminate_id: i64) -> Result<Option<SegmentSummary>> {
        let segments = self.segments.read();
        Ok(segments
            .iter()
            .find(|s| s.laminate_id == laminate_id && s.segment_num == MAIN_SEGMENT)
            .map(LaminateSegment::summary))
    }

    async fn contains_image(&self, image_url: &str) -> Result<bool> {
        let segments = self.segments.read();
        Ok(segments.iter().any(|s| s.image_url == image_url))
    }
}
