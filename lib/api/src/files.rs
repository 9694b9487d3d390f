//! Upload file storage.
//!
//! Accepted catalog and query images are written under one directory and
//! served back as static files. Stored names are random so operator-supplied
//! filenames never reach the filesystem; only the extension is kept.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use laminx_core::Result;

pub struct UploadStore {
    dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_name: String,
    pub path: PathBuf,
}

impl UploadStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store bytes under a random name, keeping the original extension
    /// (lowercased) when one is present.
    pub fn save(&self, original_name: Option<&str>, bytes: &[u8]) -> Result<StoredFile> {
        let ext = original_name
            .and_then(|n| Path::new(n).extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "png".to_string());
        let file_name = format!("{}.{ext}", Uuid::new_v4().simple());
        let path = self.dir.join(&file_name);
        fs::write(&path, bytes)?;
        debug!(file = %file_name, bytes = bytes.len(), "upload stored");
        Ok(StoredFile { file_name, path })
    }

    /// Store bytes under a caller-chosen name. Used by the catalog importer,
    /// which keeps source filenames stable across runs.
    pub fn save_named(&self, file_name: &str, bytes: &[u8]) -> Result<StoredFile> {
        let path = self.dir.join(file_name);
        fs::write(&path, bytes)?;
        Ok(StoredFile {
            file_name: file_name.to_string(),
            path,
        })
    }

    /// Delete a stored file. Missing files are not an error.
    pub fn remove(&self, file_name: &str) -> Result<()> {
        match fs::remove_file(self.dir.join(file_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Public URL the stored file is served under.
    #[must_use]
    pub fn url_for(&self, file_name: &str) -> String {
        format!("/uploads/{file_name}")
    }
}
