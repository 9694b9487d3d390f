//! Core matching pipeline for the laminate catalog.
//!
//! Contains the deterministic image normalizer, the storage and feature
//! extraction seams, the classification-gated ingestion path and the match
//! aggregator. Storage backends and the HTTP surface live in sibling crates.

pub mod embedding;
pub mod error;
pub mod extract;
pub mod gate;
pub mod matcher;
pub mod normalize;
pub mod segment;
pub mod store;
pub mod worker;

pub use embedding::Embedding;
pub use error::{Error, Result};
pub use extract::{default_admission_labels, AdmissionLabel, FeatureExtractor};
pub use gate::{AdmissionConfig, IngestRequest, Ingestion, IngestionGate};
pub use matcher::{MatchAggregator, SearchConfig, SearchParams};
pub use normalize::{normalize, CanonicalImage, NormalizeConfig};
pub use segment::{LaminateSegment, MatchResult, SegmentSummary, MAIN_SEGMENT, MAX_SEGMENT_NUM};
pub use store::CatalogStore;
pub use worker::WorkerPool;

#[cfg(test)]
pub(crate) mod testutil {
    //! Shared stubs for gate and matcher tests.

    use std::io::Cursor;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use image::{ImageFormat, Rgb, RgbImage};

    use crate::{
        CanonicalImage, CatalogStore, Embedding, Error, FeatureExtractor, LaminateSegment,
        Result, SegmentSummary, MAIN_SEGMENT,
    };

    /// Extractor returning canned classification scores and a fixed embedding.
    pub struct StubExtractor {
        pub dim: usize,
        pub embedding: Vec<f32>,
        pub probs: Vec<f32>,
    }

    #[async_trait]
    impl FeatureExtractor for StubExtractor {
        fn dim(&self) -> usize {
            self.dim
        }

        async fn embed(&self, _image: &CanonicalImage) -> Result<Embedding> {
            Ok(Embedding::new(self.embedding.clone()).normalized())
        }

        async fn classify(
            &self,
            _image: &CanonicalImage,
            _prompts: &[String],
        ) -> Result<Vec<f32>> {
            Ok(self.probs.clone())
        }
    }

    /// Linear-scan store over a locked vector.
    pub struct StubStore {
        segments: Mutex<Vec<LaminateSegment>>,
    }

    impl StubStore {
        pub fn new() -> Self {
            Self {
                segments: Mutex::new(Vec::new()),
            }
        }

        pub fn preloaded(segments: Vec<LaminateSegment>) -> Self {
            Self {
                segments: Mutex::new(segments),
            }
        }

        pub fn len(&self) -> usize {
            self.segments.lock().unwrap().len()
        }

        pub fn first(&self) -> LaminateSegment {
            self.segments.lock().unwrap()[0].clone()
        }
    }

    #[async_trait]
    impl CatalogStore for StubStore {
        async fn insert(&self, segment: LaminateSegment) -> Result<()> {
            let mut segments = self.segments.lock().unwrap();
            if segments.iter().any(|s| {
                (s.laminate_id == segment.laminate_id && s.segment_num == segment.segment_num)
                    || s.image_url == segment.image_url
            }) {
                return Err(Error::StoreConflict(format!(
                    "duplicate record for laminate {} segment {}",
                    segment.laminate_id, segment.segment_num
                )));
            }
            segments.push(segment);
            Ok(())
        }

        async fn nearest(
            &self,
            query: &Embedding,
            max_distance: f32,
            limit: usize,
        ) -> Result<Vec<(SegmentSummary, f32)>> {
            let segments = self.segments.lock().unwrap();
            let mut hits: Vec<(SegmentSummary, f32)> = segments
                .iter()
                .map(|s| (s.summary(), query.cosine_distance(&s.embedding)))
                .filter(|(_, d)| *d <= max_distance)
                .collect();
            hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            hits.truncate(limit);
            Ok(hits)
        }

        async fn fetch_main(&self, laminate_id: i64) -> Result<Option<SegmentSummary>> {
            let segments = self.segments.lock().unwrap();
            Ok(segments
                .iter()
                .find(|s| s.laminate_id == laminate_id && s.segment_num == MAIN_SEGMENT)
                .map(LaminateSegment::summary))
        }

        async fn contains_image(&self, image_url: &str) -> Result<bool> {
            let segments = self.segments.lock().unwrap();
            Ok(segments.iter().any(|s| s.image_url == image_url))
        }
    }

    pub fn segment(laminate_id: i64, segment_num: i32) -> LaminateSegment {
        LaminateSegment {
            laminate_id,
            segment_num,
            image_url: format!("/uploads/{laminate_id}-{segment_num}.jpg"),
            embedding: Embedding::new(vec![1.0, 0.0]),
            name: format!("Laminate {laminate_id}"),
            color: Some("grey".to_string()),
            code: None,
            metadata: serde_json::json!({}),
        }
    }

    /// A small valid PNG for pipeline tests.
    pub fn tiny_png() -> Vec<u8> {
        let img = RgbImage::from_fn(12, 9, |x, y| {
            Rgb([(x * 20) as u8, (y * 25) as u8, 120])
        });
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }
}
