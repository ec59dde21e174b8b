mod file_config;

pub use file_config::{FileConfig, ProcessingConfig, SizeValue, UploadsConfig};

use crate::mixing::{CommandMatcher, DEFAULT_ALLOWED_EXTENSIONS};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// Default per-file upload cap.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Origins allowed by default, matching the usual dev frontend ports.
pub const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:5173", "http://localhost:3000"];

/// Values taken from the command line, before the TOML file is applied.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub port: u16,
    pub bind_address: String,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub cors_origins: Vec<String>,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_size: u64,
    pub allowed_extensions: Vec<String>,
    pub waveform_points: usize,
    pub max_concurrent_jobs: usize,
    pub matcher_command: String,
    pub ffmpeg_path: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "127.0.0.1".to_string(),
            logging_level: RequestsLoggingLevel::Path,
            frontend_dir_path: None,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("processed"),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            waveform_points: crate::mixing::DEFAULT_WAVEFORM_POINTS,
            max_concurrent_jobs: 0,
            matcher_command: crate::mixing::DEFAULT_MATCHER_COMMAND.to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub bind_address: String,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub cors_origins: Vec<String>,

    pub uploads: UploadSettings,
    pub processing: ProcessingSettings,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_size: u64,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    pub waveform_points: usize,
    /// `None` when unbounded.
    pub max_concurrent_jobs: Option<usize>,
    pub matcher_command: String,
    pub ffmpeg_path: String,
}

impl AppConfig {
    /// Merge the command line with the optional TOML file (file wins) and
    /// validate the result.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let port = file.port.unwrap_or(cli.port);
        let bind_address = file
            .bind_address
            .unwrap_or_else(|| cli.bind_address.clone());

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());
        let cors_origins = file
            .cors_origins
            .unwrap_or_else(|| cli.cors_origins.clone());

        // Upload settings - merge file config with CLI values
        let up_file = file.uploads.unwrap_or_default();
        let max_upload_size = match up_file.max_upload_size {
            Some(SizeValue::Bytes(n)) => n,
            Some(SizeValue::Text(s)) => parse_size(&s)?,
            None => cli.max_upload_size,
        };
        if max_upload_size == 0 {
            bail!("max_upload_size must be greater than zero");
        }

        let allowed_extensions: Vec<String> = up_file
            .allowed_extensions
            .unwrap_or_else(|| cli.allowed_extensions.clone())
            .into_iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if allowed_extensions.is_empty() {
            bail!("allowed_extensions must list at least one extension");
        }

        let uploads = UploadSettings {
            upload_dir: up_file
                .upload_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| cli.upload_dir.clone()),
            output_dir: up_file
                .output_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| cli.output_dir.clone()),
            max_upload_size,
            allowed_extensions,
        };
        if uploads.upload_dir == uploads.output_dir {
            bail!(
                "upload_dir and output_dir must be different directories: {:?}",
                uploads.upload_dir
            );
        }

        // Processing settings
        let proc_file = file.processing.unwrap_or_default();
        let waveform_points = proc_file.waveform_points.unwrap_or(cli.waveform_points);
        if waveform_points == 0 {
            bail!("waveform_points must be greater than zero");
        }

        let matcher_command = proc_file
            .matcher_command
            .unwrap_or_else(|| cli.matcher_command.clone());
        CommandMatcher::parse(&matcher_command)
            .with_context(|| format!("Invalid matcher_command: {}", matcher_command))?;

        let processing = ProcessingSettings {
            waveform_points,
            max_concurrent_jobs: Some(
                proc_file
                    .max_concurrent_jobs
                    .unwrap_or(cli.max_concurrent_jobs),
            )
            .filter(|n| *n > 0),
            matcher_command,
            ffmpeg_path: proc_file
                .ffmpeg_path
                .unwrap_or_else(|| cli.ffmpeg_path.clone()),
        };

        Ok(Self {
            port,
            bind_address,
            logging_level,
            frontend_dir_path,
            cors_origins,
            uploads,
            processing,
        })
    }
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

/// Parse a size such as `"100 MiB"`, `"50MB"` or `"1048576"` into bytes.
pub fn parse_size(s: &str) -> Result<u64> {
    let byte = byte_unit::Byte::parse_str(s, true)
        .map_err(|e| anyhow::anyhow!("Invalid size '{}': {}", s, e))?;
    Ok(byte.as_u64())
}
