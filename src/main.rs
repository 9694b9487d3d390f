use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use laminx_api::{ApiContext, RestApi, UploadStore};
use laminx_core::{CatalogStore, FeatureExtractor, IngestionGate, MatchAggregator, WorkerPool};
use laminx_extract::{RemoteExtractor, RemoteExtractorConfig};
use laminx_storage::{MemoryCatalog, PgCatalog, PgConfig};

/// Laminate pattern matching service
#[derive(Parser, Debug)]
#[command(name = "laminx")]
#[command(about = "Photo-to-catalog laminate pattern matching", long_about = None)]
struct Args {
    /// HTTP API port
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

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

    /// Directory uploaded images are stored in and served from
    #[arg(long, default_value = "./uploads")]
    uploads_dir: PathBuf,

    /// Directory with the web frontend
    #[arg(long, default_value = "./public")]
    public_dir: PathBuf,

    /// Optional media tree served read-only under /admin_uploads
    #[arg(long)]
    admin_media_root: Option<PathBuf>,

    /// Max concurrent image normalizations; defaults to the CPU count
    #[arg(long)]
    max_inflight_jobs: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[actix_web::main]
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

    info!("Starting laminx v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn CatalogStore> = match &args.db_host {
        Some(host) => {
            let cfg = PgConfig {
                db_host: host.clone(),
                db_port: args.db_port,
                db_name: args.db_name.clone(),
                db_user: args.db_user.clone(),
                db_credential: args.db_credential.clone(),
            };
            info!("Connecting to Postgres at {}:{}", cfg.db_host, cfg.db_port);
            Arc::new(PgCatalog::connect(&cfg, args.embedding_dim).await?)
        }
        None => {
            info!("Using in-memory catalog, snapshots in {:?}", args.data_dir);
            Arc::new(MemoryCatalog::open(args.embedding_dim, &args.data_dir)?)
        }
    };

    let extractor: Arc<dyn FeatureExtractor> =
        Arc::new(RemoteExtractor::new(RemoteExtractorConfig {
            base_url: args.extractor_url.clone(),
            dim: args.embedding_dim,
            ..RemoteExtractorConfig::default()
        })?);
    info!("Feature extractor: {}", args.extractor_url);

    let pool = match args.max_inflight_jobs {
        Some(n) => WorkerPool::new(n),
        None => WorkerPool::with_default_capacity(),
    };

    let gate = IngestionGate::new(extractor.clone(), store.clone(), pool.clone());
    let matcher = MatchAggregator::new(extractor, store, pool);
    let uploads = UploadStore::open(&args.uploads_dir)?;

    let ctx = Arc::new(ApiContext {
        gate,
        matcher,
        uploads,
        public_dir: args.public_dir.clone(),
        admin_media_root: args.admin_media_root.clone(),
    });

    info!("HTTP API: http://localhost:{}/", args.http_port);
    RestApi::start(ctx, args.http_port).await?;
    Ok(())
}
