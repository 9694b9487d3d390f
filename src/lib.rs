//! # laminx
//!
//! Photo-to-catalog laminate pattern matching.
//!
//! A customer photo is canonicalized by a deterministic normalization
//! pipeline, embedded with a CLIP model served by an inference sidecar, and
//! matched against a catalog of laminate images by cosine similarity. Raw
//! per-segment hits are folded into one ranked result per laminate, resolved
//! to the laminate's main image. Catalog ingestion is gated: uploads that
//! the classifier does not recognize as laminate patterns are rejected.
//!
//! ## Quick Start
//!
//! ### As a Server
//!
//! ```bash
//! laminx --http-port 8080 --extractor-url http://127.0.0.1:8600
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use laminx::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(extractor: Arc<dyn FeatureExtractor>) -> laminx::Result<()> {
//! let store = Arc::new(MemoryCatalog::new(512));
//! let pool = WorkerPool::with_default_capacity();
//! let matcher = MatchAggregator::new(extractor, store, pool);
//!
//! let photo = std::fs::read("kitchen.jpg")?;
//! let params = matcher.config().default_params();
//! let matches = matcher.search(photo, params).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - `laminx-core` - normalization, gating, matching and the storage and
//!   extraction seams
//! - `laminx-storage` - in-memory catalog with snapshots, pgvector backend
//! - `laminx-extract` - HTTP client for the model inference sidecar
//! - `laminx-api` - REST endpoints and static media

pub use laminx_core::{
    default_admission_labels, normalize, AdmissionConfig, AdmissionLabel, CanonicalImage,
    CatalogStore, Embedding, Error, FeatureExtractor, IngestRequest, Ingestion, IngestionGate,
    LaminateSegment, MatchAggregator, MatchResult, NormalizeConfig, Result, SearchConfig,
    SearchParams, SegmentSummary, WorkerPool, MAIN_SEGMENT, MAX_SEGMENT_NUM,
};

pub use laminx_api::{ApiContext, RestApi, StoredFile, UploadStore};
pub use laminx_extract::{RemoteExtractor, RemoteExtractorConfig};
pub use laminx_storage::{MemoryCatalog, PgCatalog, PgConfig, SnapshotPersistence};

/// Commonly used types.
pub mod prelude {
    pub use laminx_core::{
        CanonicalImage, CatalogStore, Embedding, FeatureExtractor, IngestRequest, Ingestion,
        IngestionGate, LaminateSegment, MatchAggregator, MatchResult, NormalizeConfig,
        SearchConfig, SearchParams, SegmentSummary, WorkerPool,
    };
    pub use laminx_extract::{RemoteExtractor, RemoteExtractorConfig};
    pub use laminx_storage::{MemoryCatalog, PgCatalog, PgConfig};
}
