//! Snapshot persistence for the in-memory catalog.
//!
//! The whole catalog is serialized to a single binary snapshot after every
//! insert. Writes go through a temp file and an atomic rename, so a crash
//! mid-write leaves the previous snapshot intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use atomicwrites::{AtomicFile, OverwriteBehavior::AllowOverwrite};
use serde::{Deserialize, Serialize};

use laminx_core::{Embedding, Error, LaminateSegment, Result};

const SNAPSHOT_FILE: &str = "catalog.bin";

/// On-disk record shape. Metadata is stored as JSON text since the snapshot
/// codec needs a self-describing payload there.
#[derive(Serialize, Deserialize)]
struct SegmentSnapshot {
    laminate_id: i64,
    segment_num: i32,
    image_url: String,
    embedding: Vec<f32>,
    name: String,
    color: Option<String>,
    code: Option<String>,
    metadata: String,
}

#[derive(Serialize, Deserialize)]
struct CatalogSnapshot {
    dim: usize,
    segments: Vec<SegmentSnapshot>,
}

pub struct SnapshotPersistence {
    path: PathBuf,
}

impl SnapshotPersistence {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(SNAPSHOT_FILE),
        })
    }

    /// Load all records from the snapshot, or an empty catalog when no
    /// snapshot exists yet.
    pub fn load(&self, expected_dim: usize) -> Result<Vec<LaminateSegment>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&self.path)?;
        let snapshot: CatalogSnapshot =
            bincode::deserialize(&bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        if snapshot.dim != expected_dim {
            return Err(Error::InvalidDimension {
                expected: expected_dim,
                actual: snapshot.dim,
            });
        }
        snapshot.segments.into_iter().map(restore).collect()
    }

    /// Write the full catalog atomically.
    pub fn save(&self, dim: usize, segments: &[LaminateSegment]) -> Result<()> {
        let snapshot = CatalogSnapshot {
            dim,
            segments: segments.iter().map(capture).collect::<Result<_>>()?,
        };
        let bytes =
            bincode::serialize(&snapshot).map_err(|e| Error::Serialization(e.to_string()))?;

        let file = AtomicFile::new(&self.path, AllowOverwrite);
        file.write(|f| f.write_all(&bytes)).map_err(|e| match e {
            atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e) => Error::Io(e),
        })?;
        Ok(())
    }
}

fn capture(segment: &LaminateSegment) -> Result<SegmentSnapshot> {
    Ok(SegmentSnapshot {
        laminate_id: segment.laminate_id,
        segment_num: segment.segment_num,
        image_url: segment.image_url.clone(),
        embedding: segment.embedding.as_slice().to_vec(),
        name: segment.name.clone(),
        color: segment.color.clone(),
        code: segment.code.clone(),
        metadata: serde_json::to_string(&segment.metadata)
            .map_err(|e| Error::Serialization(e.to_string()))?,
    })
}

fn restore(snapshot: SegmentSnapshot) -> Result<LaminateSegment> {
    Ok(LaminateSegment {
        laminate_id: snapshot.laminate_id,
        segment_num: snapshot.segment_num,
        image_url: snapshot.image_url,
        embedding: Embedding::new(snapshot.embedding),
        name: snapshot.name,
        color: snapshot.color,
        code: snapshot.code,
        metadata: serde_json::from_str(&snapshot.metadata)
            .map_err(|e| Error::Serialization(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(laminate_id: i64, segment_num: i32) -> LaminateSegment {
        LaminateSegment {
            laminate_id,
            segment_num,
            image_url: format!("/uploads/{laminate_id}-{segment_num}.jpg"),
            embedding: Embedding::new(vec![0.6, 0.8]),
            name: "Alpine Ash".to_string(),
            color: Some("white".to_string()),
            code: Some("AA-7".to_string()),
            metadata: serde_json::json!({"gloss": 30}),
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = SnapshotPersistence::open(dir.path()).unwrap();

        let segments = vec![segment(1, 0), segment(1, 2), segment(9, 0)];
        persistence.save(2, &segments).unwrap();

        let loaded = persistence.load(2).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[1].laminate_id, 1);
        assert_eq!(loaded[1].segment_num, 2);
        assert_eq!(loaded[1].embedding.as_slice(), &[0.6, 0.8]);
        assert_eq!(loaded[2].metadata, serde_json::json!({"gloss": 30}));
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = SnapshotPersistence::open(dir.path()).unwrap();
        assert!(persistence.load(2).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = SnapshotPersistence::open(dir.path()).unwrap();
        persistence.save(2, &[segment(1, 0)]).unwrap();

        let err = persistence.load(512).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidDimension {
                expected: 512,
                actual: 2
            }
        ));
    }
}
