//! Bulk catalog importer.
//!
//! Walks a directory of catalog images named
//! `<laminate_id> <name words> <segment_num>.<ext>`, copies them into the
//! upload directory and runs each through the ingestion gate. An optional
//! CSV supplies per-record color, code and metadata. Re-running the importer
//! is safe: images the catalog already references are skipped.

use clap::Parser;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use laminx_api::UploadStore;
use laminx_core::{
    CatalogStore, FeatureExtractor, IngestRequest, Ingestion, IngestionGate, WorkerPool,
};
use laminx_extract::{RemoteExtractor, RemoteExtractorConfig};
use laminx_storage::{MemoryCatalog, PgCatalog, PgConfig};

/// Bulk catalog importer
#[derive(Parser, Debug)]
#[command(name = "laminx-import")]
#[command(about = "Import a directory of catalog images", long_about = None)]
struct Args {
    /// Directory of catalog images
    images_dir: PathBuf,

    /// CSV with columns laminate_id,segment_num,color,code,metadata
    #[arg(long)]
    metadata_csv: Option<PathBuf>,

    /// Snapshot directory for the in-memory catalog
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Postgres host; when unset the in-memory catalog is used
    #[arg(long)]
    db_host: Option<String>,

    /// Postgres port
    #[arg(long, default_value_t = 5432)]
    db_port: u16,

    /// Postgres database name
    #[arg(long, default_value = "laminates")]
    db_name: String,

    /// Postgres user
    #[arg(long, default_value = "postgres")]
    db_user: String,

    /// Postgres password
    #[arg(long, default_value = "")]
    db_credential: String,

    /// Base URL of the model inference sidecar
    #[arg(long, default_value = "http://127.0.0.1:8600")]
    extractor_url: String,

    /// Embedding dimensionality the sidecar produces
    #[arg(long, default_value_t = 512)]
    embedding_dim: usize,

    /// Directory uploaded images are stored in
    #[arg(long, default_value = "./uploads")]
    uploads_dir: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// `(laminate_id, name, segment_num)` parsed from a catalog image filename.
fn parse_catalog_filename(stem: &str) -> Option<(i64, String, i32)> {
    let parts: Vec<&str> = stem.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    let laminate_id: i64 = parts.first()?.parse().ok()?;
    let segment_num: i32 = parts.last()?.parse().ok()?;
    let name = parts[1..parts.len() - 1].join(" ");
    Some((laminate_id, name, segment_num))
}

#[derive(Debug, Clone)]
struct MetadataRow {
    color: Option<String>,
    code: Option<String>,
    metadata: serde_json::Value,
}

impl Default for MetadataRow {
    fn default() -> Self {
        Self {
            color: None,
            code: None,
            metadata: serde_json::json!({}),
        }
    }
}

/// Parse one CSV line, `laminate_id,segment_num,color,code,metadata`. The
/// metadata column is JSON and may itself contain commas, so it is taken as
/// the remainder of the line.
fn parse_metadata_line(line: &str) -> Option<((i64, i32), MetadataRow)> {
    let mut fields = line.splitn(5, ',');
    let laminate_id: i64 = fields.next()?.trim().parse().ok()?;
    let segment_num: i32 = fields.next()?.trim().parse().ok()?;
    let color = fields.next().map(str::trim).filter(|s| !s.is_empty());
    let code = fields.next().map(str::trim).filter(|s| !s.is_empty());
    let metadata = fields
        .next()
        .and_then(|raw| serde_json::from_str(raw.trim()).ok())
        .unwrap_or_else(|| serde_json::json!({}));
    Some((
        (laminate_id, segment_num),
        MetadataRow {
            color: color.map(str::to_string),
            code: code.map(str::to_string),
            metadata,
        },
    ))
}

fn load_metadata(path: &Path) -> anyhow::Result<HashMap<(i64, i32), MetadataRow>> {
    let text = fs::read_to_string(path)?;
    let mut rows = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("laminate_id") {
            continue;
        }
        match parse_metadata_line(line) {
            Some((key, row)) => {
                rows.insert(key, row);
            }
            None => warn!(line, "unparseable metadata row, ignoring"),
        }
    }
    Ok(rows)
}

fn is_catalog_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg" | "png")
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store: Arc<dyn CatalogStore> = match &args.db_host {
        Some(host) => {
            let cfg = PgConfig {
                db_host: host.clone(),
                db_port: args.db_port,
                db_name: args.db_name.clone(),
                db_user: args.db_user.clone(),
                db_credential: args.db_credential.clone(),
            };
            Arc::new(PgCatalog::connect(&cfg, args.embedding_dim).await?)
        }
        None => Arc::new(MemoryCatalog::open(args.embedding_dim, &args.data_dir)?),
    };

    let extractor: Arc<dyn FeatureExtractor> =
        Arc::new(RemoteExtractor::new(RemoteExtractorConfig {
            base_url: args.extractor_url.clone(),
            dim: args.embedding_dim,
            ..RemoteExtractorConfig::default()
        })?);
    let gate = IngestionGate::new(extractor, store, WorkerPool::with_default_capacity());
    let uploads = UploadStore::open(&args.uploads_dir)?;

    let metadata = match &args.metadata_csv {
        Some(path) => load_metadata(path)?,
        None => HashMap::new(),
    };

    let mut paths: Vec<PathBuf> = fs::read_dir(&args.images_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_catalog_image(p))
        .collect();
    paths.sort();
    info!(files = paths.len(), dir = %args.images_dir.display(), "scanning catalog images");

    let mut requests = Vec::new();
    let mut unparseable = 0usize;
    for path in &paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            unparseable += 1;
            continue;
        };
        let Some((laminate_id, name, segment_num)) = parse_catalog_filename(stem) else {
            warn!(file = %path.display(), "filename does not match catalog pattern, skipping");
            unparseable += 1;
            continue;
        };

        let bytes = fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{laminate_id}-{segment_num}.jpg"));
        let stored = uploads.save_named(&file_name, &bytes)?;
        let row = metadata
            .get(&(laminate_id, segment_num))
            .cloned()
            .unwrap_or_default();

        requests.push(IngestRequest {
            laminate_id,
            segment_num,
            image_url: uploads.url_for(&stored.file_name),
            image_bytes: bytes,
            name,
            color: row.color,
            code: row.code,
            metadata: row.metadata,
        });
    }

    let outcomes = gate.ingest_batch(requests).await;
    let mut accepted = 0usize;
    let mut rejected = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(Ingestion::Accepted(_)) => accepted += 1,
            Ok(Ingestion::Rejected {
                label, confidence, ..
            }) => {
                warn!(label = %label, confidence, "image rejected by admission check");
                rejected += 1;
            }
            Ok(Ingestion::Skipped { .. }) => skipped += 1,
            Err(e) => {
                warn!(error = %e, "ingestion failed");
                failed += 1;
            }
        }
    }

    info!(
        accepted,
        rejected, skipped, failed, unparseable, "import finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog_filename() {
        assert_eq!(
            parse_catalog_filename("5223 Volango Concreat 0"),
            Some((5223, "Volango Concreat".to_string(), 0))
        );
        assert_eq!(
            parse_catalog_filename("17 Oak 3"),
            Some((17, "Oak".to_string(), 3))
        );
        assert_eq!(parse_catalog_filename("just a name"), None);
        assert_eq!(parse_catalog_filename("5223 NoSegment"), None);
        assert_eq!(parse_catalog_filename(""), None);
    }

    #[test]
    fn test_parse_metadata_line() {
        let (key, row) =
            parse_metadata_line(r#"5223,0,grey,VC-9,{"finish": "matte", "gloss": 10}"#).unwrap();
        assert_eq!(key, (5223, 0));
        assert_eq!(row.color.as_deref(), Some("grey"));
        assert_eq!(row.code.as_deref(), Some("VC-9"));
        assert_eq!(row.metadata["finish"], "matte");

        // empty optional columns and missing metadata
        let (_, row) = parse_metadata_line("17,1,,,").unwrap();
        assert!(row.color.is_none());
        assert!(row.code.is_none());
        assert_eq!(row.metadata, serde_json::json!({}));

        assert!(parse_metadata_line("not,a").is_none());
    }
}
