//! REST surface: search, catalog ingestion and static media.

use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_files::Files;
use actix_multipart::form::bytes::Bytes;
use actix_multipart::form::text::Text;
use actix_multipart::form::{MultipartForm, MultipartFormConfig};
use actix_web::{web, App, HttpResponse, HttpServer, Result as ActixResult};
use serde::Deserialize;
use tracing::warn;

use laminx_core::{Error, IngestRequest, Ingestion, IngestionGate, MatchAggregator};

use crate::files::UploadStore;

/// Shared state handed to every handler.
pub struct ApiContext {
    pub gate: IngestionGate,
    pub matcher: MatchAggregator,
    pub uploads: UploadStore,
    pub public_dir: PathBuf,
    /// Optional extra media tree served read-only under `/admin_uploads`.
    pub admin_media_root: Option<PathBuf>,
}

#[derive(Deserialize)]
struct SearchQuery {
    /// Similarity floor in 0..=1; converted to a distance bound internally.
    threshold: Option<f32>,
    top_n: Option<usize>,
}

#[derive(MultipartForm)]
struct SearchForm {
    file: Bytes,
}

#[derive(MultipartForm)]
struct UploadLaminateForm {
    laminate_id: Text<i64>,
    segment_num: Text<i32>,
    name: Text<String>,
    color: Option<Text<String>>,
    code: Option<Text<String>>,
    /// JSON object as text.
    metadata: Option<Text<String>>,
    file: Bytes,
}

pub struct RestApi;

impl RestApi {
    pub async fn start(ctx: Arc<ApiContext>, port: u16) -> std::io::Result<()> {
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            let multipart_limits = MultipartFormConfig::default()
                .total_limit(64 * 1024 * 1024)
                .memory_limit(64 * 1024 * 1024);

            let mut app = App::new()
                .wrap(cors)
                .app_data(web::Data::new(ctx.clone()))
                .app_data(multipart_limits)
                .route("/api", web::get().to(service_info))
                .route("/api/search", web::post().to(search))
                .route("/api/laminates", web::post().to(upload_laminate))
                .service(Files::new("/uploads", ctx.uploads.dir()));

            if let Some(root) = &ctx.admin_media_root {
                app = app.service(Files::new("/admin_uploads", root));
            }

            // the SPA catch-all goes last so it cannot shadow API routes
            app.service(Files::new("/", &ctx.public_dir).index_file("index.html"))
        })
        .bind(("0.0.0.0", port))?
        .run()
        .await
    }
}

async fn service_info() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "service": "laminx",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok"
    })))
}

async fn search(
    ctx: web::Data<Arc<ApiContext>>,
    query: web::Query<SearchQuery>,
    MultipartForm(form): MultipartForm<SearchForm>,
) -> ActixResult<HttpResponse> {
    let mut params = ctx.matcher.config().default_params();
    if let Some(threshold) = query.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Ok(HttpResponse::BadRequest().json(serde_json::json!({
                "error": "threshold must be within 0..=1"
            })));
        }
        params.distance_threshold = 1.0 - threshold;
    }
    if let Some(top_n) = query.top_n {
        if top_n == 0 {
            return Ok(HttpResponse::BadRequest().json(serde_json::json!({
                "error": "top_n must be positive"
            })));
        }
        params.top_n = top_n;
    }

    match ctx.matcher.search(form.file.data.to_vec(), params).await {
        Ok(matches) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "matches": matches
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn upload_laminate(
    ctx: web::Data<Arc<ApiContext>>,
    MultipartForm(form): MultipartForm<UploadLaminateForm>,
) -> ActixResult<HttpResponse> {
    let bytes = form.file.data.to_vec();

    let metadata = match form.metadata.as_deref() {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "unparseable metadata field, storing empty object");
                serde_json::json!({})
            }
        },
        None => serde_json::json!({}),
    };

    // store the image first so an accepted record can reference it; rolled
    // back below when the upload does not land
    let stored = match ctx.uploads.save(form.file.file_name.as_deref(), &bytes) {
        Ok(stored) => stored,
        Err(e) => return Ok(error_response(&e)),
    };

    let request = IngestRequest {
        laminate_id: form.laminate_id.into_inner(),
        segment_num: form.segment_num.into_inner(),
        image_url: ctx.uploads.url_for(&stored.file_name),
        image_bytes: bytes,
        name: form.name.into_inner(),
        color: form.color.map(Text::into_inner),
        code: form.code.map(Text::into_inner),
        metadata,
    };

    match ctx.gate.ingest(request).await {
        Ok(Ingestion::Accepted(summary)) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "record": summary
        }))),
        Ok(Ingestion::Rejected {
            label,
            confidence,
            reason,
        }) => {
            discard(&ctx, &stored.file_name);
            Ok(HttpResponse::UnprocessableEntity().json(serde_json::json!({
                "status": "rejected",
                "label": label,
                "confidence": confidence,
                "reason": reason
            })))
        }
        Ok(Ingestion::Skipped { image_url }) => {
            discard(&ctx, &stored.file_name);
            Ok(HttpResponse::Conflict().json(serde_json::json!({
                "error": format!("image {image_url} already cataloged")
            })))
        }
        Err(e) => {
            discard(&ctx, &stored.file_name);
            Ok(error_response(&e))
        }
    }
}

fn discard(ctx: &ApiContext, file_name: &str) {
    if let Err(e) = ctx.uploads.remove(file_name) {
        warn!(file = file_name, error = %e, "failed to remove stored upload");
    }
}

fn error_response(e: &Error) -> HttpResponse {
    let body = serde_json::json!({ "error": e.to_string() });
    match e {
        Error::InvalidImage(_) | Error::InvalidRequest(_) => HttpResponse::BadRequest().json(body),
        Error::StoreConflict(_) => HttpResponse::Conflict().json(body),
        Error::StoreUnavailable(_) => HttpResponse::ServiceUnavailable().json(body),
        Error::Extractor(_) | Error::InvalidDimension { .. } => {
            HttpResponse::BadGateway().json(body)
        }
        _ => HttpResponse::InternalServerError().json(body),
    }
}
