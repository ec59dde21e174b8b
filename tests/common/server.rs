//! Per-test server instances.
//!
//! Each test gets an isolated server with its own upload and output
//! directories and its own job store.

use super::constants::*;
use super::fixtures::{FakeMatcher, FakeWaveformExtractor};
use mixmatch_server::mixing::{
    create_dispatcher, FileHandler, InMemoryJobStore, JobRunner, JobStore, MixManager,
    DEFAULT_ALLOWED_EXTENSIONS,
};
use mixmatch_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with isolated storage
///
/// When dropped, the server and its dispatcher shut down and the temp
/// directories are removed.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Where uploads are staged
    pub upload_dir: PathBuf,

    /// Where results are written
    pub output_dir: PathBuf,

    _temp_dir: TempDir,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawns a new test server on a random port with an instant matcher
    pub async fn spawn() -> Self {
        Self::spawn_with_delay(Duration::ZERO).await
    }

    /// Spawns a test server whose matcher takes `delay` per job
    ///
    /// # Panics
    ///
    /// Panics if port binding fails or the server doesn't become ready within
    /// the timeout.
    pub async fn spawn_with_delay(delay: Duration) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let upload_dir = temp_dir.path().join("uploads");
        let output_dir = temp_dir.path().join("processed");

        let allowed: Vec<String> = DEFAULT_ALLOWED_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .collect();
        let file_handler = Arc::new(FileHandler::new(
            &upload_dir,
            &output_dir,
            TEST_MAX_UPLOAD_SIZE,
            &allowed,
        ));

        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let runner = Arc::new(JobRunner::new(
            store.clone(),
            Arc::new(FakeMatcher { delay }),
            Arc::new(FakeWaveformExtractor),
            TEST_WAVEFORM_POINTS,
        ));

        let shutdown = CancellationToken::new();
        let (dispatcher, worker) = create_dispatcher(runner, None, shutdown.clone());
        tokio::spawn(worker.run());

        let manager = Arc::new(MixManager::new(store, file_handler, dispatcher));
        manager.init().await.expect("Failed to create storage dirs");

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            max_upload_size: TEST_MAX_UPLOAD_SIZE,
            ..Default::default()
        };
        let app = make_app(ServerState::new(config, manager));

        // Spawn server in background task with graceful shutdown
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            upload_dir,
            output_dir,
            _temp_dir: temp_dir,
            shutdown,
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the /health endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }

    /// Number of entries currently in the upload directory
    pub fn upload_dir_entries(&self) -> usize {
        std::fs::read_dir(&self.upload_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Wait until both directories hold at most the given number of entries
    ///
    /// Runners clean up right after recording the terminal status, so a test
    /// that has just seen a job finish may still observe its files briefly.
    pub async fn wait_for_entries(&self, uploads: usize, outputs: usize) {
        let start = std::time::Instant::now();
        while self.upload_dir_entries() > uploads || self.output_dir_entries() > outputs {
            if start.elapsed() > Duration::from_millis(JOB_TIMEOUT_MS) {
                panic!(
                    "Expected at most {} uploads and {} outputs, found {} and {}",
                    uploads,
                    outputs,
                    self.upload_dir_entries(),
                    self.output_dir_entries()
                );
            }
            tokio::time::sleep(Duration::from_millis(JOB_POLL_INTERVAL_MS)).await;
        }
    }

    /// Number of entries currently in the output directory
    pub fn output_dir_entries(&self) -> usize {
        std::fs::read_dir(&self.output_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        // TempDir will be cleaned up automatically
    }
}
