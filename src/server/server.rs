use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use super::mix_routes::{mix_routes, FILES_PREFIX};
use super::{log_requests, metrics::metrics_handler, state::*};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    Json(stats)
}

fn make_cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    if origins.iter().any(|o| o == "*") {
        return Some(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(Any),
        );
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
    )
}

pub fn make_app(state: ServerState) -> Router {
    let config = state.config.clone();

    let home_router: Router = match config.frontend_dir_path {
        Some(ref frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    let files_service = ServeDir::new(state.mix_manager.file_handler().output_dir());

    let mut app: Router = home_router
        .merge(mix_routes(config.max_upload_size).with_state(state.clone()))
        .route("/metrics", get(metrics_handler))
        .nest_service(FILES_PREFIX, files_service);

    if let Some(cors) = make_cors_layer(&config.cors_origins) {
        app = app.layer(cors);
    }
    app = app.layer(middleware::from_fn_with_state(state.clone(), log_requests));

    app
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn run_server<F>(state: ServerState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = format!("{}:{}", state.config.bind_address, state.config.port);
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
