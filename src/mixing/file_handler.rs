//! File handling for mix uploads and results.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Which side of the mix an upload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRole {
    Target,
    Reference,
}

impl UploadRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Reference => "reference",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "target" => Some(Self::Target),
            "reference" => Some(Self::Reference),
            _ => None,
        }
    }
}

impl std::fmt::Display for UploadRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur while receiving uploads.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid file type for {role} file '{filename}'. Allowed: {allowed}")]
    InvalidExtension {
        role: UploadRole,
        filename: String,
        allowed: String,
    },

    #[error("The {0} file exceeds the maximum upload size of {1:#}")]
    FileTooLarge(UploadRole, byte_unit::Byte),

    #[error("Request body exceeds the maximum allowed size")]
    RequestTooLarge,

    #[error("Target and reference files are identical; upload two different files")]
    IdenticalFiles,

    #[error("Missing {0} file")]
    MissingField(UploadRole),

    #[error("The {0} file was sent more than once")]
    DuplicateField(UploadRole),

    #[error("The {0} file is empty")]
    EmptyFile(UploadRole),

    #[error("Malformed upload: {0}")]
    Malformed(String),

    #[error("Storage write failure: {0}")]
    Storage(#[from] std::io::Error),
}

impl UploadError {
    /// Short machine-friendly reason, used as a metrics label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidExtension { .. } => "invalid_extension",
            Self::FileTooLarge(..) | Self::RequestTooLarge => "too_large",
            Self::IdenticalFiles => "identical",
            Self::MissingField(_) => "missing_field",
            Self::DuplicateField(_) => "duplicate_field",
            Self::EmptyFile(_) => "empty_file",
            Self::Malformed(_) => "malformed",
            Self::Storage(_) => "storage",
        }
    }
}

/// Default allowed audio extensions.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg", "m4a"];

/// File handler for the upload and output areas.
///
/// Every filename it produces is derived from a job id, so two jobs can never
/// collide in either directory.
pub struct FileHandler {
    upload_dir: PathBuf,
    output_dir: PathBuf,
    max_file_size: u64,
    allowed_extensions: Vec<String>,
}

impl FileHandler {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        max_file_size: u64,
        allowed_extensions: &[String],
    ) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
            max_file_size,
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Create the upload and output directories.
    pub async fn init(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.upload_dir).await?;
        fs::create_dir_all(&self.output_dir).await?;
        Ok(())
    }

    /// Validate the client filename and return its lowercase extension.
    pub fn validate_extension(
        &self,
        role: UploadRole,
        filename: &str,
    ) -> Result<String, UploadError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext {
            Some(ext) if self.allowed_extensions.contains(&ext) => Ok(ext),
            _ => Err(UploadError::InvalidExtension {
                role,
                filename: filename.to_string(),
                allowed: self
                    .allowed_extensions
                    .iter()
                    .map(|e| format!(".{}", e))
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Start streaming an upload into a temporary file in the upload area.
    ///
    /// The temporary file is removed when the returned value is dropped,
    /// unless it is persisted first.
    pub fn begin_upload(
        &self,
        job_id: &str,
        role: UploadRole,
        extension: &str,
    ) -> Result<StagedUpload, UploadError> {
        let temp = tempfile::Builder::new()
            .prefix(&format!("{}_{}_", job_id, role))
            .suffix(".part")
            .tempfile_in(&self.upload_dir)?;
        let (file, path) = temp.into_parts();

        Ok(StagedUpload {
            role,
            extension: extension.to_string(),
            max_size: self.max_file_size,
            size: 0,
            hasher: Sha256::new(),
            file: fs::File::from_std(file),
            path,
        })
    }

    /// Final location of an accepted upload.
    pub fn upload_path(&self, job_id: &str, role: UploadRole, extension: &str) -> PathBuf {
        self.upload_dir
            .join(format!("{}_{}.{}", job_id, role, extension))
    }

    /// Name of the result file for a job.
    pub fn output_filename(job_id: &str) -> String {
        format!("{}_processed.wav", job_id)
    }

    pub fn output_path(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(Self::output_filename(job_id))
    }

    /// Resolve a client-supplied result filename inside the output area.
    ///
    /// Returns `None` for anything that is not a plain filename.
    pub fn resolve_output(&self, filename: &str) -> Option<PathBuf> {
        if !is_plain_filename(filename) {
            return None;
        }
        Some(self.output_dir.join(filename))
    }

    /// Remove a file, logging instead of failing.
    pub async fn discard(path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }
}

/// Whether `name` is a bare filename that cannot escape its directory.
fn is_plain_filename(name: &str) -> bool {
    if name.is_empty() || name.contains('\0') || name.starts_with('.') {
        return false;
    }
    if name.contains('/') || name.contains('\\') {
        return false;
    }
    Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

/// An upload being written to disk.
pub struct StagedUpload {
    role: UploadRole,
    extension: String,
    max_size: u64,
    size: u64,
    hasher: Sha256,
    // Declared before `path` so the handle closes before the file is removed.
    file: fs::File,
    path: TempPath,
}

impl StagedUpload {
    pub fn role(&self) -> UploadRole {
        self.role
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append a chunk. A chunk that would push the file past the cap is
    /// rejected before any of its bytes are written.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        let new_size = self.size + chunk.len() as u64;
        if new_size > self.max_size {
            return Err(UploadError::FileTooLarge(
                self.role,
                byte_unit::Byte::from(self.max_size),
            ));
        }

        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.size = new_size;
        Ok(())
    }

    /// Flush the file and compute its fingerprint.
    pub async fn finish(mut self) -> Result<ReceivedUpload, UploadError> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        if self.size == 0 {
            return Err(UploadError::EmptyFile(self.role));
        }

        let fingerprint = format!("sha256:{:x}", self.hasher.finalize());
        Ok(ReceivedUpload {
            role: self.role,
            extension: self.extension,
            size: self.size,
            fingerprint,
            path: self.path,
        })
    }
}

/// A fully received upload, still in temporary storage.
pub struct ReceivedUpload {
    pub role: UploadRole,
    pub extension: String,
    pub size: u64,
    pub fingerprint: String,
    path: TempPath,
}

impl ReceivedUpload {
    /// Move the upload to its final location.
    pub fn persist(self, destination: &Path) -> Result<PathBuf, UploadError> {
        self.path
            .persist(destination)
            .map_err(|e| UploadError::Storage(e.error))?;
        Ok(destination.to_path_buf())
    }
}
