//! Feature extraction seam.
//!
//! The matching pipeline never talks to a model directly; it goes through
//! [`FeatureExtractor`], which yields an embedding for a normalized image and
//! zero-shot classification probabilities for a prompt set. The production
//! implementation lives in `laminx-extract` and calls the model sidecar over
//! HTTP; tests substitute stubs.

use async_trait::async_trait;

use crate::error::Result;
use crate::normalize::CanonicalImage;
use crate::Embedding;

#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    /// Dimensionality of embeddings this extractor produces.
    fn dim(&self) -> usize;

    /// Embed a normalized image. Implementations return unit-norm vectors.
    async fn embed(&self, image: &CanonicalImage) -> Result<Embedding>;

    /// Zero-shot classify a normalized image against `prompts`.
    ///
    /// Returns one probability per prompt, in prompt order, summing to ~1.
    async fn classify(&self, image: &CanonicalImage, prompts: &[String]) -> Result<Vec<f32>>;
}

/// One candidate label for the admission check: a short name surfaced in
/// rejection reasons and the full prompt sent to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionLabel {
    pub name: &'static str,
    pub prompt: &'static str,
}

/// Contrastive prompt set for deciding whether an upload shows a laminate
/// pattern. The first entry is the accept label; the rest are distractors
/// chosen to absorb the common kinds of mistaken uploads.
pub fn default_admission_labels() -> Vec<AdmissionLabel> {
    vec![
        AdmissionLabel {
            name: "laminate",
            prompt: "a laminate pattern",
        },
        AdmissionLabel {
            name: "person",
            prompt: "a person",
        },
        AdmissionLabel {
            name: "meme",
            prompt: "a meme",
        },
        AdmissionLabel {
            name: "room",
            prompt: "a room",
        },
        AdmissionLabel {
            name: "random",
            prompt: "a random object",
        },
    ]
}
