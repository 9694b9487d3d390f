//! Catalog ingestion with classification gating.
//!
//! Operator uploads pass three checks before a record is stored: the segment
//! number must be in range, the image must normalize, and the normalized
//! image must be classified as a laminate pattern with enough confidence.
//! Only then is the embedding computed and the record inserted.

use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::extract::{default_admission_labels, AdmissionLabel, FeatureExtractor};
use crate::normalize::{normalize, NormalizeConfig};
use crate::segment::{LaminateSegment, SegmentSummary, MAIN_SEGMENT, MAX_SEGMENT_NUM};
use crate::store::CatalogStore;
use crate::worker::WorkerPool;

/// Admission policy: which labels compete, which one admits, and the
/// confidence floor the winner must clear.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub labels: Vec<AdmissionLabel>,
    pub accept_label: String,
    pub min_confidence: f32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            labels: default_admission_labels(),
            accept_label: "laminate".to_string(),
            min_confidence: 0.4,
        }
    }
}

/// One upload to be ingested.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub laminate_id: i64,
    pub segment_num: i32,
    pub image_url: String,
    pub image_bytes: Vec<u8>,
    pub name: String,
    pub color: Option<String>,
    pub code: Option<String>,
    pub metadata: Value,
}

/// Outcome of one ingestion attempt.
#[derive(Debug, Clone)]
pub enum Ingestion {
    /// Passed the admission check and was stored.
    Accepted(SegmentSummary),
    /// Classified as something other than a laminate pattern; nothing stored.
    Rejected {
        label: String,
        confidence: f32,
        reason: String,
    },
    /// The catalog already holds a record for this image URL.
    Skipped { image_url: String },
}

pub struct IngestionGate {
    extractor: Arc<dyn FeatureExtractor>,
    store: Arc<dyn CatalogStore>,
    pool: WorkerPool,
    normalize: NormalizeConfig,
    admission: AdmissionConfig,
}

impl IngestionGate {
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
            AdmissionConfig::default(),
        )
    }

    pub fn with_config(
        extractor: Arc<dyn FeatureExtractor>,
        store: Arc<dyn CatalogStore>,
        pool: WorkerPool,
        normalize: NormalizeConfig,
        admission: AdmissionConfig,
    ) -> Self {
        Self {
            extractor,
            store,
            pool,
            normalize,
            admission,
        }
    }

    /// Ingest one upload: validate, normalize, gate, embed, store.
    pub async fn ingest(&self, req: IngestRequest) -> Result<Ingestion> {
        let IngestRequest {
            laminate_id,
            segment_num,
            image_url,
            image_bytes,
            name,
            color,
            code,
            metadata,
        } = req;

        if !(MAIN_SEGMENT..=MAX_SEGMENT_NUM).contains(&segment_num) {
            return Err(Error::InvalidRequest(format!(
                "segment_num {segment_num} out of range {MAIN_SEGMENT}..={MAX_SEGMENT_NUM}"
            )));
        }

        let cfg = self.normalize.clone();
        let canonical = self.pool.run(move || normalize(&image_bytes, &cfg)).await??;

        let prompts: Vec<String> = self
            .admission
            .labels
            .iter()
            .map(|l| l.prompt.to_string())
            .collect();
        let probs = self.extractor.classify(&canonical, &prompts).await?;
        if probs.len() != self.admission.labels.len() {
            return Err(Error::Extractor(format!(
                "classifier returned {} scores for {} prompts",
                probs.len(),
                self.admission.labels.len()
            )));
        }

        let (top_idx, top_prob) = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
            .map(|(i, p)| (i, *p))
            .ok_or_else(|| Error::Extractor("classifier returned no scores".to_string()))?;
        let top = &self.admission.labels[top_idx];

        if top.name != self.admission.accept_label || top_prob <= self.admission.min_confidence {
            info!(
                laminate_id,
                segment_num,
                label = top.name,
                confidence = top_prob,
                "upload rejected by admission check"
            );
            return Ok(Ingestion::Rejected {
                label: top.name.to_string(),
                confidence: top_prob,
                reason: "not recognized as a laminate pattern".to_string(),
            });
        }

        let embedding = self.extractor.embed(&canonical).await?.normalized();
        let segment = LaminateSegment {
            laminate_id,
            segment_num,
            image_url,
            embedding,
            name,
            color,
            code,
            metadata,
        };
        let summary = segment.summary();
        self.store.insert(segment).await?;
        info!(
            laminate_id,
            segment_num,
            label = top.name,
            confidence = top_prob,
            "catalog record ingested"
        );
        Ok(Ingestion::Accepted(summary))
    }

    /// Ingest a batch, skipping images the catalog already references.
    ///
    /// Outcomes are reported per request in input order; a failure on one
    /// request does not abort the rest.
    pub async fn ingest_batch(&self, requests: Vec<IngestRequest>) -> Vec<Result<Ingestion>> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for req in requests {
            match self.store.contains_image(&req.image_url).await {
                Ok(true) => {
                    debug!(image_url = %req.image_url, "image already cataloged, skipping");
                    outcomes.push(Ok(Ingestion::Skipped {
                        image_url: req.image_url,
                    }));
                }
                Ok(false) => outcomes.push(self.ingest(req).await),
                Err(e) => outcomes.push(Err(e)),
            }
        }
        outcomes
    }
}
