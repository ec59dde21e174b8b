//! Request logging middleware
//!
//! Every request runs inside a `request` span carrying a short id, which is
//! echoed back in the `x-request-id` header so client reports can be matched
//! to server logs.

use super::super::state::ServerState;
use crate::server::metrics::record_http_request;
use axum::extract::State;
use axum::{
    body::{Body, Bytes},
    http::{header::HeaderMap, HeaderValue, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(PartialEq, PartialOrd, Clone, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
    Body,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

const MAX_LOGGABLE_BODY_LENGTH: usize = 1024;

/// Why a body is not printed.
#[derive(Debug, PartialEq)]
enum SkipBody {
    NoLength,
    Streaming,
    TooBig(usize),
}

/// Size of a body worth printing, judged from its headers alone.
fn loggable_body_size(headers: &HeaderMap) -> Result<usize, SkipBody> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    // Uploads and result downloads are audio.
    if content_type.starts_with("multipart/") || content_type.starts_with("audio/") {
        return Err(SkipBody::Streaming);
    }

    let size = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .ok_or(SkipBody::NoLength)?;

    if size >= MAX_LOGGABLE_BODY_LENGTH {
        return Err(SkipBody::TooBig(size));
    }
    Ok(size)
}

fn log_skipped(direction: &str, reason: SkipBody) {
    match reason {
        SkipBody::NoLength => info!("  {} body: no usable content-length", direction),
        SkipBody::Streaming => info!("  {} body: audio payload, not logged", direction),
        SkipBody::TooBig(size) => info!(
            "  {} body: too big to log ({:#})",
            direction,
            byte_unit::Byte::from(size as u64)
        ),
    }
}

/// Buffer a small body, print it and hand back an equivalent one.
async fn buffer_and_log(direction: &str, body: Body, size: usize) -> Result<Body, ()> {
    let bytes: Bytes = axum::body::to_bytes(body, size).await.map_err(|e| {
        error!("Failed to read {} body: {:?}", direction, e);
    })?;
    info!("  {} body:\n{}", direction, String::from_utf8_lossy(&bytes));
    Ok(Body::from(bytes))
}

fn log_headers(direction: &str, headers: &HeaderMap) {
    info!("  {} headers:", direction);
    for (name, value) in headers.iter() {
        info!("    {:?}: {:?}", name, value);
    }
}

fn internal_error() -> Response<Body> {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

pub async fn log_requests(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let request_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let span = info_span!("request", id = %request_id);

    let mut response = handle_logged(state, request, next).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn handle_logged(state: ServerState, request: Request<Body>, next: Next) -> Response<Body> {
    let level = state.config.requests_logging_level.clone();
    let start = Instant::now();

    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, request.uri());
    }
    if level >= RequestsLoggingLevel::Headers {
        log_headers("Req", request.headers());
    }

    let request = if level >= RequestsLoggingLevel::Body {
        match loggable_body_size(request.headers()) {
            Ok(size) => {
                let (parts, body) = request.into_parts();
                match buffer_and_log("Req", body, size).await {
                    Ok(body) => Request::from_parts(parts, body),
                    Err(()) => return internal_error(),
                }
            }
            Err(reason) => {
                log_skipped("Req", reason);
                request
            }
        }
    } else {
        request
    };

    let response = next.run(request).await;

    if level >= RequestsLoggingLevel::Headers {
        log_headers("Resp", response.headers());
    }

    let response = if level >= RequestsLoggingLevel::Body {
        match loggable_body_size(response.headers()) {
            Ok(size) => {
                let (parts, body) = response.into_parts();
                match buffer_and_log("Resp", body, size).await {
                    Ok(body) => Response::from_parts(parts, body),
                    Err(()) => return internal_error(),
                }
            }
            Err(reason) => {
                log_skipped("Resp", reason);
                response
            }
        }
    } else {
        response
    };

    let status = response.status().as_u16();
    let duration = start.elapsed();
    if level > RequestsLoggingLevel::None {
        info!("<<< {} ({}ms)", status, duration.as_millis());
    }
    record_http_request(&method, &path, status, duration);

    response
}
