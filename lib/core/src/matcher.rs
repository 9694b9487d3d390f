//! Search and match aggregation.
//!
//! A query photo is normalized and embedded, nearby catalog records are
//! fetched, and the raw per-segment hits are folded into one ranked result
//! per laminate, each resolved to the laminate's main image.

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use tracing::warn;

use crate::error::Result;
use crate::extract::FeatureExtractor;
use crate::normalize::{normalize, NormalizeConfig};
use crate::segment::{MatchResult, SegmentSummary, MAIN_SEGMENT};
use crate::store::CatalogStore;
use crate::worker::WorkerPool;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// How many raw segment hits to pull from the store before grouping.
    pub candidate_limit: usize,
    /// Similarity floor applied when a query does not specify one.
    pub default_similarity_threshold: f32,
    /// Result count when a query does not specify one.
    pub default_top_n: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 50,
            default_similarity_threshold: 0.8,
            default_top_n: 5,
        }
    }
}

/// Per-query knobs, already converted to the store's distance metric.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub distance_threshold: f32,
    pub top_n: usize,
}

impl SearchConfig {
    #[must_use]
    pub fn default_params(&self) -> SearchParams {
        SearchParams {
            distance_threshold: 1.0 - self.default_similarity_threshold,
            top_n: self.default_top_n,
        }
    }
}

pub struct MatchAggregator {
    extractor: Arc<dyn FeatureExtractor>,
    store: Arc<dyn CatalogStore>,
    pool: WorkerPool,
    normalize: NormalizeConfig,
    config: SearchConfig,
}

impl MatchAggregator {
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        store: Arc<dyn CatalogStore>,
        pool: WorkerPool,
    ) -> Self {
        Self::with_config(
            extractor,
            store,
            pool,
            NormalizeConfig::default(),
            SearchConfig::default(),
        )
    }

    pub fn with_config(
        extractor: Arc<dyn FeatureExtractor>,
        store: Arc<dyn CatalogStore>,
        pool: WorkerPool,
        normalize: NormalizeConfig,
        config: SearchConfig,
    ) -> Self {
        Self {
            extractor,
            store,
            pool,
            normalize,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Match a query photo against the catalog.
    pub async fn search(
        &self,
        image_bytes: Vec<u8>,
        params: SearchParams,
    ) -> Result<Vec<MatchResult>> {
        let cfg = self.normalize.clone();
        let canonical = self.pool.run(move || normalize(&image_bytes, &cfg)).await??;
        let query = self.extractor.embed(&canonical).await?.normalized();

        let candidates = self
            .store
            .nearest(&query, params.distance_threshold, self.config.candidate_limit)
            .await?;
        self.aggregate(candidates, params.top_n).await
    }

    /// Fold per-segment hits into one ranked result per laminate.
    ///
    /// Each laminate keeps its best (smallest) segment distance; strict
    /// comparison means the first-seen segment wins a tie. Laminates whose
    /// main record is missing are dropped with a warning.
    async fn aggregate(
        &self,
        candidates: Vec<(SegmentSummary, f32)>,
        top_n: usize,
    ) -> Result<Vec<MatchResult>> {
        let mut best: HashMap<i64, f32> = HashMap::new();
        let mut order: Vec<i64> = Vec::new();
        for (summary, distance) in candidates {
            match best.entry(summary.laminate_id) {
                Entry::Occupied(mut e) => {
                    if distance < *e.get() {
                        e.insert(distance);
                    }
                }
                Entry::Vacant(e) => {
                    e.insert(distance);
                    order.push(summary.laminate_id);
                }
            }
        }

        let mut results = Vec::with_capacity(order.len());
        for laminate_id in order {
            let Some(main) = self.store.fetch_main(laminate_id).await? else {
                warn!(laminate_id, "laminate has no main record, dropping from results");
                continue;
            };
            let distance = best[&laminate_id];
            results.push(MatchResult {
                laminate_id,
                name: main.name,
                color: main.color,
                code: main.code,
                image_url: main.image_url,
                segment_num: MAIN_SEGMENT,
                similarity: round3(1.0 - distance),
            });
        }

        results.sort_by_key(|r| Reverse(OrderedFloat(r.similarity)));
        results.truncate(top_n);
        Ok(results)
    }
}

#[inline]
fn round3(x: f32) -> f32 {
    (x * 1000.0).round() / 1000.0
}
