//! HTTP surface for the laminate catalog.
//!
//! Multipart search and ingestion endpoints plus static serving of the
//! upload directory and the web frontend.

pub mod files;
pub mod rest;

pub use files::{StoredFile, UploadStore};
pub use rest::{ApiContext, RestApi};
