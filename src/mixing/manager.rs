//! Mix manager: the entry point the HTTP layer talks to.
//!
//! It turns a finished [`UploadSession`] into a queued job, hands the job to
//! the dispatcher and answers status and download lookups.

use super::dispatcher::{DispatchError, JobDispatcher, MixTask};
use super::file_handler::{FileHandler, UploadError, UploadRole};
use super::models::{JobCounts, JobUpdate, MixJob};
use super::store::{JobStore, JobStoreError};
use super::upload::UploadSession;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors from mix manager operations.
#[derive(Debug, Error)]
pub enum MixError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Job store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl MixError {
    /// Short machine-friendly reason, used as a metrics label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Upload(e) => e.reason(),
            Self::Store(_) => "store",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

pub struct MixManager {
    store: Arc<dyn JobStore>,
    file_handler: Arc<FileHandler>,
    dispatcher: JobDispatcher,
}

impl MixManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        file_handler: Arc<FileHandler>,
        dispatcher: JobDispatcher,
    ) -> Self {
        Self {
            store,
            file_handler,
            dispatcher,
        }
    }

    /// Prepare the storage areas.
    pub async fn init(&self) -> Result<(), std::io::Error> {
        self.file_handler.init().await?;
        info!(
            "Mix storage ready: uploads in {:?}, results in {:?}",
            self.file_handler.upload_dir(),
            self.file_handler.output_dir()
        );
        Ok(())
    }

    pub fn file_handler(&self) -> &FileHandler {
        &self.file_handler
    }

    /// Start receiving a new pair of uploads.
    pub fn start_upload(&self) -> UploadSession {
        UploadSession::new(self.file_handler.clone())
    }

    /// Accept a fully received session: persist both files, create the job
    /// and queue it. Returns the job id.
    ///
    /// On any error nothing is left on disk and no job is visible.
    pub async fn submit(&self, session: UploadSession) -> Result<String, MixError> {
        let (job_id, target, reference) = session.into_pair()?;

        let target_dest =
            self.file_handler
                .upload_path(&job_id, UploadRole::Target, &target.upload.extension);
        let reference_dest = self.file_handler.upload_path(
            &job_id,
            UploadRole::Reference,
            &reference.upload.extension,
        );

        let target_path = target.upload.persist(&target_dest)?;
        let reference_path = match reference.upload.persist(&reference_dest) {
            Ok(path) => path,
            Err(e) => {
                FileHandler::discard(&target_path).await;
                return Err(e.into());
            }
        };

        let job = MixJob::new(&job_id, &target.filename, &reference.filename);
        if let Err(e) = self.store.create_job(job) {
            FileHandler::discard(&target_path).await;
            FileHandler::discard(&reference_path).await;
            return Err(e.into());
        }

        let task = MixTask {
            job_id: job_id.clone(),
            target_path,
            reference_path,
            output_path: self.file_handler.output_path(&job_id),
        };

        if let Err(DispatchError::Closed(task)) = self.dispatcher.dispatch(task) {
            warn!("Rejecting job {}: dispatcher closed", job_id);
            self.abandon(&task).await;
            return Err(MixError::Unavailable("server is shutting down".to_string()));
        }

        info!(
            "Queued job {} (target '{}', reference '{}')",
            job_id, target.filename, reference.filename
        );
        Ok(job_id)
    }

    /// Close out a job that was created but can never run.
    async fn abandon(&self, task: &MixTask) {
        let outcome = self
            .store
            .update_job(&task.job_id, JobUpdate::Start)
            .and_then(|_| {
                self.store.update_job(
                    &task.job_id,
                    JobUpdate::Fail {
                        error: "server shutting down".to_string(),
                    },
                )
            });
        if let Err(e) = outcome {
            error!("Could not close abandoned job {}: {}", task.job_id, e);
        }
        FileHandler::discard(&task.target_path).await;
        FileHandler::discard(&task.reference_path).await;
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<MixJob>, MixError> {
        Ok(self.store.get_job(job_id)?)
    }

    pub fn list_jobs(&self) -> Result<Vec<MixJob>, MixError> {
        Ok(self.store.list_jobs()?)
    }

    pub fn job_counts(&self) -> Result<JobCounts, MixError> {
        Ok(self.store.count_by_status()?)
    }

    /// Path of a result file, if the name is acceptable and the file exists.
    pub async fn resolve_output(&self, filename: &str) -> Option<PathBuf> {
        let path = self.file_handler.resolve_output(filename)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }
}
