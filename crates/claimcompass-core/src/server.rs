//! HTTP surface
//!
//! `POST /api/analyze` runs in two layers. The inner pipeline (ingest →
//! normalize → analyze) returns typed errors: bad input is a 400, a failed or
//! unreadable model call is a 500. The outer handler runs that pipeline as its
//! own task, so anything else that goes wrong in it (a panic, a lost blocking
//! task) still comes back as a well-formed `AnalysisResult` with
//! `success: false`.

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{Method, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use claimcompass_tools::ImageFetcher;

use crate::analysis::{AnalysisError, AnalysisResult, DamageAnalyzer};
use crate::ingest::{self, ImageSource, IngestError, UploadedFile};

pub const SERVICE_NAME: &str = "ClaimCompass API";
pub const API_VERSION: &str = "1.0.0";

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<dyn DamageAnalyzer>,
    pub fetcher: ImageFetcher,
    pub frontend_dir: Arc<PathBuf>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        analyzer: Arc<dyn DamageAnalyzer>,
        fetcher: ImageFetcher,
        frontend_dir: impl Into<PathBuf>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            analyzer,
            fetcher,
            frontend_dir: Arc::new(frontend_dir.into()),
            max_upload_bytes,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::Internal(msg) => {
                error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(serde_json::json!({
            "detail": message,
        }));

        (status, body).into_response()
    }
}

/// Failures of the inner analyze pipeline.
#[derive(Debug, thiserror::Error)]
enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("{0}")]
    Unexpected(String),
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let static_files = ServeDir::new(state.frontend_dir.as_path());
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/", get(index))
        .route("/api", get(api_root))
        .route("/health", get(health_check))
        .route("/api/analyze", post(analyze_damage))
        .nest_service("/static", static_files)
        .layer(body_limit)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
struct Endpoints {
    analyze: &'static str,
    health: &'static str,
}

#[derive(Serialize)]
struct ApiInfo {
    service: &'static str,
    version: &'static str,
    status: &'static str,
    endpoints: Endpoints,
}

/// Health check endpoint - healthy whenever the process is serving
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
    })
}

async fn api_root() -> Json<ApiInfo> {
    Json(ApiInfo {
        service: SERVICE_NAME,
        version: API_VERSION,
        status: "healthy",
        endpoints: Endpoints {
            analyze: "/api/analyze",
            health: "/health",
        },
    })
}

/// Serve the single-page frontend
async fn index(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let path = state.frontend_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Ok(Html(page)),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            Err(ApiError::NotFound("Frontend not found".to_string()))
        }
    }
}

/// Analyze car damage from an uploaded file or an image URL.
///
/// # Multipart Fields
/// - `file`: image file (optional)
/// - `image_url`: URL of an image (optional)
///
/// Exactly one of the two must be given.
///
/// # Returns
/// - 200 with an `AnalysisResult` (including soft failures, `success: false`)
/// - 400 for missing/conflicting sources, non-images, download or decode failures
/// - 500 when the vision model call fails or its reply cannot be parsed
async fn analyze_damage(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let (file, image_url) = match multipart {
        Ok(multipart) => read_form(multipart).await?,
        Err(rejection) => {
            debug!("Request is not a multipart form: {}", rejection);
            (None, None)
        }
    };

    let source = ImageSource::select(file, image_url)?;

    match tokio::spawn(run_pipeline(state, source)).await {
        Ok(Ok(result)) => Ok(Json(result)),
        Ok(Err(PipelineError::Ingest(e))) => Err(e.into()),
        Ok(Err(PipelineError::Analysis(e))) => Err(e.into()),
        Ok(Err(PipelineError::Unexpected(message))) => {
            warn!("Analysis failed unexpectedly: {}", message);
            Ok(Json(AnalysisResult::failed(message)))
        }
        Err(e) => {
            error!("Analysis task aborted: {}", e);
            Ok(Json(AnalysisResult::failed(e.to_string())))
        }
    }
}

async fn read_form(
    mut multipart: Multipart,
) -> Result<(Option<UploadedFile>, Option<String>), ApiError> {
    let mut file = None;
    let mut image_url = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "image_url" => {
                image_url = Some(field.text().await.map_err(multipart_error)?);
            }
            other => debug!("Ignoring form field {:?}", other),
        }
    }

    Ok((file, image_url))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    let message = format!("Failed to read form data: {}", err.body_text());
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(message)
    } else {
        ApiError::BadRequest(message)
    }
}

async fn run_pipeline(
    state: AppState,
    source: ImageSource,
) -> Result<AnalysisResult, PipelineError> {
    let bytes = source.into_bytes(&state.fetcher).await?;

    let base64_jpeg = tokio::task::spawn_blocking(move || ingest::normalize(&bytes))
        .await
        .map_err(|e| PipelineError::Unexpected(format!("Image processing aborted: {}", e)))??;

    info!("Submitting image to analyzer {}", state.analyzer.name());
    let result = state.analyzer.analyze(&base64_jpeg).await?;

    Ok(result)
}
