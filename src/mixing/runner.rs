//! Job runner: processes one accepted mix request.
//!
//! Pipeline for a claimed job:
//! 1. PROCESSING at 0%
//! 2. Match the target against the reference
//! 3. Progress 80%
//! 4. Extract the waveform preview of the result
//! 5. COMPLETED at 100% with result and waveform attached
//! 6. Remove the source uploads (always, best effort)
//!
//! Any failure in steps 2-5, including a panic inside a collaborator, ends the
//! job in FAILED with the cause recorded. Nothing escapes the job boundary.

use super::dispatcher::MixTask;
use super::file_handler::FileHandler;
use super::models::{JobUpdate, MixJob, MixJobStatus};
use super::processor::{AudioMatcher, ProcessingError, WaveformExtractor};
use super::store::{JobStore, JobStoreError};
use crate::server::metrics;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Progress reported once matching is done.
pub const PROGRESS_AFTER_MATCH: u8 = 80;

/// Default number of waveform points.
pub const DEFAULT_WAVEFORM_POINTS: usize = 500;

/// Why a claimed job failed.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{0}")]
    Processing(#[from] ProcessingError),

    #[error("{0}")]
    Store(#[from] JobStoreError),

    #[error("Output path has no filename: {0}")]
    InvalidOutputPath(String),

    #[error("Processing panicked: {0}")]
    Panicked(String),
}

/// Runs the matching pipeline for jobs handed over by the dispatcher.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    matcher: Arc<dyn AudioMatcher>,
    extractor: Arc<dyn WaveformExtractor>,
    waveform_points: usize,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        matcher: Arc<dyn AudioMatcher>,
        extractor: Arc<dyn WaveformExtractor>,
        waveform_points: usize,
    ) -> Self {
        Self {
            store,
            matcher,
            extractor,
            waveform_points,
        }
    }

    /// Run a job to a terminal state. Returns the final status, or `None` if
    /// the job could not be claimed.
    pub async fn run(&self, task: MixTask) -> Option<MixJobStatus> {
        // Claiming is the QUEUED -> PROCESSING transition; only one caller wins.
        if let Err(e) = self.store.update_job(&task.job_id, JobUpdate::Start) {
            warn!("Not running job {}: {}", task.job_id, e);
            return None;
        }

        info!("Processing job {}", task.job_id);
        metrics::job_started();
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.process(&task))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RunnerError::Panicked(panic_message(panic))));

        let status = match outcome {
            Ok(job) => {
                info!(
                    "Job {} completed in {:.1}s",
                    task.job_id,
                    started.elapsed().as_secs_f64()
                );
                job.status
            }
            Err(e) => {
                warn!("Job {} failed: {}", task.job_id, e);
                self.record_failure(&task.job_id, e.to_string());
                FileHandler::discard(&task.output_path).await;
                MixJobStatus::Failed
            }
        };
        metrics::job_finished(status.as_str(), started.elapsed());

        FileHandler::discard(&task.target_path).await;
        FileHandler::discard(&task.reference_path).await;
        debug!("Cleaned up source files for job {}", task.job_id);

        Some(status)
    }

    async fn process(&self, task: &MixTask) -> Result<MixJob, RunnerError> {
        self.matcher
            .match_audio(&task.target_path, &task.reference_path, &task.output_path)
            .await?;

        self.store
            .update_job(&task.job_id, JobUpdate::Progress(PROGRESS_AFTER_MATCH))?;

        let waveform = self
            .extractor
            .extract_waveform(&task.output_path, self.waveform_points)
            .await?;

        let result_ref = task
            .output_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                RunnerError::InvalidOutputPath(task.output_path.display().to_string())
            })?
            .to_string();

        Ok(self.store.update_job(
            &task.job_id,
            JobUpdate::Complete {
                result_ref,
                waveform,
            },
        )?)
    }

    fn record_failure(&self, job_id: &str, error: String) {
        if let Err(e) = self.store.update_job(job_id, JobUpdate::Fail { error }) {
            error!("Could not mark job {} as failed: {}", job_id, e);
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
