//! Feature extraction client.
//!
//! Implements `laminx_core::FeatureExtractor` against the HTTP inference
//! sidecar that serves the CLIP model.

pub mod remote;

pub use remote::{RemoteExtractor, RemoteExtractorConfig};
