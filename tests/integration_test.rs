// End-to-end tests over the full pipeline with an in-memory catalog and a
// deterministic stand-in extractor.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};

use laminx::prelude::*;
use laminx::{AdmissionConfig, Result};

/// Extractor that embeds the mean luminance of each image quadrant. The
/// normalization pipeline preserves spatial structure, so two photos of the
/// same pattern embed identically while different patterns diverge.
struct QuadrantExtractor {
    probs: Vec<f32>,
}

impl QuadrantExtractor {
    fn accepting() -> Self {
        Self {
            probs: vec![0.9, 0.04, 0.03, 0.02, 0.01],
        }
    }

    fn rejecting() -> Self {
        Self {
            probs: vec![0.05, 0.85, 0.05, 0.03, 0.02],
        }
    }
}

#[async_trait]
impl FeatureExtractor for QuadrantExtractor {
    fn dim(&self) -> usize {
        4
    }

    async fn embed(&self, image: &CanonicalImage) -> Result<Embedding> {
        let rgb = image.as_rgb();
        let (w, h) = rgb.dimensions();
        let mut sums = [0.0f64; 4];
        let mut counts = [0.0f64; 4];
        for (x, y, p) in rgb.enumerate_pixels() {
            let quadrant = (usize::from(y >= h / 2) << 1) | usize::from(x >= w / 2);
            let luma = 0.299 * f64::from(p[0]) + 0.587 * f64::from(p[1]) + 0.114 * f64::from(p[2]);
            sums[quadrant] += luma;
            counts[quadrant] += 1.0;
        }
        let means: Vec<f32> = sums
            .iter()
            .zip(counts.iter())
            .map(|(s, c)| (s / c.max(1.0)) as f32 + 1.0)
            .collect();
        Ok(Embedding::new(means).normalized())
    }

    async fn classify(&self, _image: &CanonicalImage, _prompts: &[String]) -> Result<Vec<f32>> {
        Ok(self.probs.clone())
    }
}

fn png(img: &RgbImage) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Png).unwrap();
    cursor.into_inner()
}

/// Left half bright, right half dark.
fn left_right_pattern() -> Vec<u8> {
    png(&RgbImage::from_fn(24, 24, |x, _| {
        if x < 12 {
            Rgb([230, 225, 220])
        } else {
            Rgb([25, 30, 35])
        }
    }))
}

/// Top half bright, bottom half dark.
fn top_bottom_pattern() -> Vec<u8> {
    png(&RgbImage::from_fn(24, 24, |_, y| {
        if y < 12 {
            Rgb([230, 225, 220])
        } else {
            Rgb([25, 30, 35])
        }
    }))
}

fn fast_normalize() -> NormalizeConfig {
    NormalizeConfig {
        target_size: 16,
        denoise_patch_size: 3,
        denoise_search_window: 5,
        ..NormalizeConfig::default()
    }
}

fn pipeline(
    extractor: QuadrantExtractor,
    store: Arc<MemoryCatalog>,
) -> (IngestionGate, MatchAggregator) {
    let extractor: Arc<dyn FeatureExtractor> = Arc::new(extractor);
    let pool = WorkerPool::new(2);
    let gate = IngestionGate::with_config(
        extractor.clone(),
        store.clone(),
        pool.clone(),
        fast_normalize(),
        AdmissionConfig::default(),
    );
    let matcher = MatchAggregator::with_config(
        extractor,
        store,
        pool,
        fast_normalize(),
        SearchConfig::default(),
    );
    (gate, matcher)
}

fn request(laminate_id: i64, segment_num: i32, bytes: Vec<u8>) -> IngestRequest {
    IngestRequest {
        laminate_id,
        segment_num,
        image_url: format!("/uploads/{laminate_id}-{segment_num}.png"),
        image_bytes: bytes,
        name: format!("Laminate {laminate_id}"),
        color: Some("grey".to_string()),
        code: None,
        metadata: serde_json::json!({}),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ingest_then_search_finds_matching_laminate() {
    let store = Arc::new(MemoryCatalog::new(4));
    let (gate, matcher) = pipeline(QuadrantExtractor::accepting(), store);

    for req in [
        request(1, 0, left_right_pattern()),
        request(1, 1, left_right_pattern()),
        request(2, 0, top_bottom_pattern()),
    ] {
        assert!(matches!(
            gate.ingest(req).await.unwrap(),
            Ingestion::Accepted(_)
        ));
    }

    let params = SearchParams {
        distance_threshold: 0.3,
        top_n: 5,
    };
    let matches = matcher.search(left_right_pattern(), params).await.unwrap();

    // one result per laminate, best match first, resolved to the main image
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].laminate_id, 1);
    assert_eq!(matches[0].segment_num, 0);
    assert_eq!(matches[0].image_url, "/uploads/1-0.png");
    assert!(matches[0].similarity > 0.99);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loose_threshold_ranks_all_laminates() {
    let store = Arc::new(MemoryCatalog::new(4));
    let (gate, matcher) = pipeline(QuadrantExtractor::accepting(), store);

    gate.ingest(request(1, 0, left_right_pattern()))
        .await
        .unwrap();
    gate.ingest(request(2, 0, top_bottom_pattern()))
        .await
        .unwrap();

    let params = SearchParams {
        distance_threshold: 2.0,
        top_n: 5,
    };
    let matches = matcher.search(left_right_pattern(), params).await.unwrap();

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].laminate_id, 1);
    assert_eq!(matches[1].laminate_id, 2);
    assert!(matches[0].similarity > matches[1].similarity);

    let matches = matcher
        .search(
            left_right_pattern(),
            SearchParams {
                distance_threshold: 2.0,
                top_n: 1,
            },
        )
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_upload_stores_nothing() {
    let store = Arc::new(MemoryCatalog::new(4));
    let (gate, _) = pipeline(QuadrantExtractor::rejecting(), store.clone());

    let outcome = gate
        .ingest(request(1, 0, left_right_pattern()))
        .await
        .unwrap();
    match outcome {
        Ingestion::Rejected { label, .. } => assert_eq!(label, "person"),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_reimport_is_idempotent() {
    let store = Arc::new(MemoryCatalog::new(4));
    let (gate, _) = pipeline(QuadrantExtractor::accepting(), store.clone());

    let batch = || {
        vec![
            request(1, 0, left_right_pattern()),
            request(2, 0, top_bottom_pattern()),
        ]
    };

    let first = gate.ingest_batch(batch()).await;
    assert!(first
        .iter()
        .all(|r| matches!(r, Ok(Ingestion::Accepted(_)))));

    let second = gate.ingest_batch(batch()).await;
    assert!(second
        .iter()
        .all(|r| matches!(r, Ok(Ingestion::Skipped { .. }))));
    assert_eq!(store.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_catalog_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Arc::new(MemoryCatalog::open(4, dir.path()).unwrap());
        let (gate, _) = pipeline(QuadrantExtractor::accepting(), store);
        gate.ingest(request(1, 0, left_right_pattern()))
            .await
            .unwrap();
    }

    let store = Arc::new(MemoryCatalog::open(4, dir.path()).unwrap());
    assert_eq!(store.len(), 1);

    let (_, matcher) = pipeline(QuadrantExtractor::accepting(), store);
    let matches = matcher
        .search(
            left_right_pattern(),
            SearchParams {
                distance_threshold: 0.3,
                top_n: 5,
            },
        )
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].laminate_id, 1);
}
