use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mixmatch_server::config;
use mixmatch_server::mixing::{
    create_dispatcher, CommandMatcher, FfmpegWaveformExtractor, FileHandler, InMemoryJobStore,
    JobRunner, JobStore, MixManager, DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MATCHER_COMMAND,
    DEFAULT_WAVEFORM_POINTS,
};
use mixmatch_server::server::{
    metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState,
};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_size(s: &str) -> Result<u64, String> {
    config::parse_size(s).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8000)]
    pub port: u16,

    /// The address to bind to.
    #[clap(long, default_value = "127.0.0.1")]
    pub bind_address: String,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Origin allowed to call the API from a browser. Repeatable; "*" allows any.
    #[clap(long = "cors-origin")]
    pub cors_origins: Vec<String>,

    /// Directory where uploads are kept until their job finishes.
    #[clap(long, value_parser = parse_path, default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Directory where results are written and served from.
    #[clap(long, value_parser = parse_path, default_value = "processed")]
    pub output_dir: PathBuf,

    /// Maximum size of each uploaded file, e.g. "100 MiB".
    #[clap(long, value_parser = parse_size, default_value = "100 MiB")]
    pub max_upload_size: u64,

    /// Allowed upload extension. Repeatable; defaults to common audio formats.
    #[clap(long = "allowed-extension")]
    pub allowed_extensions: Vec<String>,

    /// Number of points in the waveform preview.
    #[clap(long, default_value_t = DEFAULT_WAVEFORM_POINTS)]
    pub waveform_points: usize,

    /// Maximum number of jobs processed at once. 0 means unbounded.
    #[clap(long, default_value_t = 0)]
    pub max_concurrent_jobs: usize,

    /// Matcher command line. {target}, {reference} and {output} are replaced with paths.
    #[clap(long, default_value = DEFAULT_MATCHER_COMMAND)]
    pub matcher_command: String,

    /// Path to the ffmpeg binary used for waveform extraction.
    #[clap(long, default_value = "ffmpeg")]
    pub ffmpeg_path: String,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        let defaults = config::CliConfig::default();
        config::CliConfig {
            port: args.port,
            bind_address: args.bind_address.clone(),
            logging_level: args.logging_level.clone(),
            frontend_dir_path: args.frontend_dir_path.clone(),
            cors_origins: if args.cors_origins.is_empty() {
                defaults.cors_origins
            } else {
                args.cors_origins.clone()
            },
            upload_dir: args.upload_dir.clone(),
            output_dir: args.output_dir.clone(),
            max_upload_size: args.max_upload_size,
            allowed_extensions: if args.allowed_extensions.is_empty() {
                DEFAULT_ALLOWED_EXTENSIONS
                    .iter()
                    .map(|e| e.to_string())
                    .collect()
            } else {
                args.allowed_extensions.clone()
            },
            waveform_points: args.waveform_points,
            max_concurrent_jobs: args.max_concurrent_jobs,
            matcher_command: args.matcher_command.clone(),
            ffmpeg_path: args.ffmpeg_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  upload_dir: {:?}", app_config.uploads.upload_dir);
    info!("  output_dir: {:?}", app_config.uploads.output_dir);
    info!(
        "  max_upload_size: {:#}",
        byte_unit::Byte::from(app_config.uploads.max_upload_size)
    );
    info!("  allowed_extensions: {:?}", app_config.uploads.allowed_extensions);
    info!("  matcher_command: {}", app_config.processing.matcher_command);
    match app_config.processing.max_concurrent_jobs {
        Some(n) => info!("  max_concurrent_jobs: {}", n),
        None => info!("  max_concurrent_jobs: unbounded"),
    }

    // Initialize metrics system
    info!("Initializing metrics...");
    metrics::init_metrics();

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let matcher = Arc::new(CommandMatcher::parse(
        &app_config.processing.matcher_command,
    )?);
    let extractor = Arc::new(FfmpegWaveformExtractor::new(
        app_config.processing.ffmpeg_path.clone(),
    ));
    let runner = Arc::new(JobRunner::new(
        store.clone(),
        matcher,
        extractor,
        app_config.processing.waveform_points,
    ));

    let shutdown_token = CancellationToken::new();
    let (dispatcher, worker) = create_dispatcher(
        runner,
        app_config.processing.max_concurrent_jobs,
        shutdown_token.child_token(),
    );
    let worker_handle = tokio::spawn(worker.run());

    let file_handler = Arc::new(FileHandler::new(
        &app_config.uploads.upload_dir,
        &app_config.uploads.output_dir,
        app_config.uploads.max_upload_size,
        &app_config.uploads.allowed_extensions,
    ));
    let mix_manager = Arc::new(MixManager::new(store, file_handler, dispatcher));
    mix_manager.init().await?;

    let state = ServerState::new(
        ServerConfig {
            requests_logging_level: app_config.logging_level.clone(),
            port: app_config.port,
            bind_address: app_config.bind_address.clone(),
            frontend_dir_path: app_config.frontend_dir_path.clone(),
            cors_origins: app_config.cors_origins.clone(),
            max_upload_size: app_config.uploads.max_upload_size,
        },
        mix_manager,
    );

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating graceful shutdown");
            signal_token.cancel();
        }
    });

    info!("Ready to serve at port {}!", app_config.port);
    let result = run_server(state, shutdown_token.clone().cancelled_owned()).await;
    info!("HTTP server stopped: {:?}", result);

    // Jobs already accepted still run to completion.
    shutdown_token.cancel();
    if let Err(e) = worker_handle.await {
        error!("Job dispatcher task failed: {}", e);
    }

    result
}
