//! Mix HTTP routes.
//!
//! Provides endpoints for:
//! - Submitting a target/reference pair
//! - Polling job status
//! - Downloading results
//! - Health and admin job stats

use axum::{
    body::Body,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, io::BufReader};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::mixing::{
    JobCounts, MixError, MixJob, MixJobStatus, MixManager, UploadError, UploadRole, WaveformPoint,
};
use crate::server::metrics;
use crate::server::state::{GuardedMixManager, ServerState};

/// Room for multipart boundaries and part headers on top of the two files.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// URL prefix under which result files are served statically.
pub const FILES_PREFIX: &str = "/files";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: MixJobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waveform_data: Option<Vec<WaveformPoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<MixJob> for JobStatusResponse {
    fn from(job: MixJob) -> Self {
        Self {
            status: job.status,
            progress: job.progress,
            file_url: job
                .result_ref
                .map(|name| format!("{}/{}", FILES_PREFIX, name)),
            waveform_data: job.waveform,
            error: job.error_message,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub jobs: JobCounts,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn status_for(error: &MixError) -> StatusCode {
    match error {
        MixError::Upload(UploadError::FileTooLarge(..))
        | MixError::Upload(UploadError::RequestTooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
        MixError::Upload(UploadError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        MixError::Upload(_) => StatusCode::BAD_REQUEST,
        MixError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        MixError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Text sent back to the client. Server-side failures carry local paths, so
/// they are only logged.
fn client_message(error: &MixError, status: StatusCode) -> String {
    if status.is_server_error() && !matches!(error, MixError::Unavailable(_)) {
        "Internal server error".to_string()
    } else {
        error.to_string()
    }
}

fn multipart_error(e: MultipartError) -> UploadError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::RequestTooLarge
    } else {
        UploadError::Malformed(e.body_text())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /mix - Upload target and reference files (multipart/form-data)
async fn create_mix(
    State(manager): State<GuardedMixManager>,
    mut multipart: Multipart,
) -> Response {
    match receive_and_submit(&manager, &mut multipart).await {
        Ok(job_id) => {
            metrics::record_upload("accepted");
            Json(UploadResponse {
                job_id,
                message: "Processing started".to_string(),
            })
            .into_response()
        }
        Err(e) => {
            metrics::record_upload(e.reason());
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Failed to accept mix request: {:?}", e);
            } else {
                info!("Rejected mix request: {}", e);
            }
            error_response(status, client_message(&e, status))
        }
    }
}

async fn receive_and_submit(
    manager: &MixManager,
    multipart: &mut Multipart,
) -> Result<String, MixError> {
    let mut session = manager.start_upload();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e).into()),
        };

        let Some(role) = field.name().and_then(UploadRole::parse) else {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        };
        let filename = field.file_name().unwrap_or_default().to_string();

        let chunks = field.map_err(multipart_error);
        if let Err(e) = session.receive(role, &filename, chunks).await {
            drain(multipart).await;
            return Err(e.into());
        }
    }

    manager.submit(session).await
}

/// Read and discard the rest of the body so the client gets to see the
/// error response instead of a reset connection. Bounded by the body limit.
async fn drain(multipart: &mut Multipart) {
    while let Ok(Some(mut field)) = multipart.next_field().await {
        while let Ok(Some(_)) = field.chunk().await {}
    }
}

/// GET /status/{job_id} - Get job status
async fn get_status(
    State(manager): State<GuardedMixManager>,
    Path(job_id): Path<String>,
) -> Response {
    match manager.get_job(&job_id) {
        Ok(Some(job)) => Json(JobStatusResponse::from(job)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Job not found"),
        Err(e) => {
            error!("Failed to get job {}: {}", job_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get job")
        }
    }
}

/// GET /download/{filename} - Download a result file
async fn download_file(
    State(manager): State<GuardedMixManager>,
    Path(filename): Path<String>,
) -> Response {
    let path = match manager.resolve_output(&filename).await {
        Some(path) => path,
        None => return error_response(StatusCode::NOT_FOUND, "File not found"),
    };
    debug!("Serving result file {}", path.display());

    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open result file {}: {}", path.display(), e);
            return error_response(StatusCode::NOT_FOUND, "File not found");
        }
    };
    let file_length = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let file_reader = BufReader::with_capacity(4096 * 16, file);
    let stream = ReaderStream::with_capacity(file_reader, 4096 * 16);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(header::CONTENT_LENGTH, file_length)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// GET /admin/stats - Job counts per status
async fn admin_stats(State(manager): State<GuardedMixManager>) -> Response {
    match manager.job_counts() {
        Ok(jobs) => Json(StatsResponse { jobs }).into_response(),
        Err(e) => {
            warn!("Failed to count jobs: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to count jobs")
        }
    }
}

/// GET /admin/jobs - List jobs, newest first
async fn admin_list_jobs(
    State(manager): State<GuardedMixManager>,
    Query(pagination): Query<PaginationQuery>,
) -> Response {
    match manager.list_jobs() {
        Ok(jobs) => {
            let page: Vec<MixJob> = jobs
                .into_iter()
                .rev()
                .skip(pagination.offset)
                .take(pagination.limit)
                .collect();
            Json(page).into_response()
        }
        Err(e) => {
            warn!("Failed to list jobs: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list jobs")
        }
    }
}

// =============================================================================
// Router
// =============================================================================

/// Mix routes:
/// - POST /mix - Submit a target/reference pair
/// - GET /status/{job_id} - Poll a job
/// - GET /download/{filename} - Download a result as an attachment
/// - GET /health - Liveness
/// - GET /admin/stats - Job counts per status
/// - GET /admin/jobs - Job listing
pub fn mix_routes(max_upload_size: u64) -> Router<ServerState> {
    // Two files plus multipart framing; the per-file cap is enforced while
    // streaming.
    let body_limit = max_upload_size
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD);
    let upload_route = Router::new()
        .route("/mix", post(create_mix))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ));

    let admin_routes = Router::new()
        .route("/stats", get(admin_stats))
        .route("/jobs", get(admin_list_jobs));

    Router::new()
        .merge(upload_route)
        .route("/status/{job_id}", get(get_status))
        .route("/download/{filename}", get(download_file))
        .route("/health", get(health))
        .nest("/admin", admin_routes)
}
