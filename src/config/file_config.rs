use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub logging_level: Option<String>,
    pub frontend_dir_path: Option<String>,
    pub cors_origins: Option<Vec<String>>,

    // Feature configs
    pub uploads: Option<UploadsConfig>,
    pub processing: Option<ProcessingConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct UploadsConfig {
    pub upload_dir: Option<String>,
    pub output_dir: Option<String>,
    /// Per-file cap, either a byte count or a string such as "100 MiB".
    pub max_upload_size: Option<SizeValue>,
    pub allowed_extensions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    pub waveform_points: Option<usize>,
    /// 0 means unbounded.
    pub max_concurrent_jobs: Option<usize>,
    pub matcher_command: Option<String>,
    pub ffmpeg_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(u64),
    Text(String),
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
