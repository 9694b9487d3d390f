//! HTTP client for the model inference sidecar.
//!
//! The sidecar owns the CLIP weights and exposes two endpoints: `/embed`
//! returns an image embedding, `/classify` returns zero-shot probabilities
//! for a prompt set. Images are shipped as canonical PNG multipart uploads.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use laminx_core::{CanonicalImage, Embedding, Error, FeatureExtractor, Result};

#[derive(Debug, Clone)]
pub struct RemoteExtractorConfig {
    /// Sidecar base URL, e.g. `http://127.0.0.1:8600`.
    pub base_url: String,
    /// Embedding dimensionality the sidecar produces.
    pub dim: usize,
    pub timeout: Duration,
}

impl Default for RemoteExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8600".to_string(),
            dim: 512,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct RemoteExtractor {
    client: reqwest::Client,
    embed_url: String,
    classify_url: String,
    dim: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    probs: Vec<f32>,
}

impl RemoteExtractor {
    pub fn new(cfg: RemoteExtractorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::Extractor(e.to_string()))?;
        let base = cfg.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            embed_url: format!("{base}/embed"),
            classify_url: format!("{base}/classify"),
            dim: cfg.dim,
        })
    }

    fn image_part(image: &CanonicalImage) -> Result<reqwest::multipart::Part> {
        let png = image.to_png()?;
        reqwest::multipart::Part::bytes(png)
            .file_name("image.png")
            .mime_str("image/png")
            .map_err(|e| Error::Extractor(e.to_string()))
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T> {
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Extractor(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::Extractor(format!(
                "{url} returned {status}: {body}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Extractor(e.to_string()))
    }
}

#[async_trait]
impl FeatureExtractor for RemoteExtractor {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, image: &CanonicalImage) -> Result<Embedding> {
        let form = reqwest::multipart::Form::new().part("file", Self::image_part(image)?);
        let body: EmbedResponse = self.post_form(&self.embed_url, form).await?;

        if body.embedding.len() != self.dim {
            return Err(Error::InvalidDimension {
                expected: self.dim,
                actual: body.embedding.len(),
            });
        }
        debug!(dim = self.dim, "embedding received");
        Ok(Embedding::new(body.embedding).normalized())
    }

    async fn classify(&self, image: &CanonicalImage, prompts: &[String]) -> Result<Vec<f32>> {
        let labels =
            serde_json::to_string(prompts).map_err(|e| Error::Serialization(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", Self::image_part(image)?)
            .text("labels", labels);
        let body: ClassifyResponse = self.post_form(&self.classify_url, form).await?;

        if body.probs.len() != prompts.len() {
            return Err(Error::Extractor(format!(
                "classifier returned {} scores for {} prompts",
                body.probs.len(),
                prompts.len()
            )));
        }
        Ok(body.probs)
    }
}
