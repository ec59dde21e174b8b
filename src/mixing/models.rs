//! Data models for mix jobs.
//!
//! A mix job is created when a target/reference pair is accepted and then
//! moves through a strict lifecycle:
//! 1. QUEUED: files persisted, waiting for a runner
//! 2. PROCESSING: runner matching the target against the reference
//! 3. COMPLETED / FAILED: terminal, never left again

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of a mix job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixJobStatus {
    /// Job created, waiting for a runner.
    Queued,
    /// A runner has claimed the job.
    Processing,
    /// Successfully completed.
    Completed,
    /// Failed (non-recoverable).
    Failed,
}

impl MixJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for MixJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single point of the waveform preview.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformPoint {
    /// Offset from the start of the audio, in seconds.
    pub time: f64,
    /// RMS amplitude of the bucket starting at `time`.
    pub amplitude: f64,
}

/// A mutation applied to a job record.
///
/// Updates form a closed set so that every store backend validates the same
/// state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// Claim the job for processing (QUEUED -> PROCESSING, progress reset to 0).
    Start,
    /// Bump progress while PROCESSING.
    Progress(u8),
    /// Attach the result (PROCESSING -> COMPLETED).
    Complete {
        result_ref: String,
        waveform: Vec<WaveformPoint>,
    },
    /// Record a failure (PROCESSING -> FAILED).
    Fail { error: String },
}

impl JobUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Progress(_) => "progress",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
        }
    }
}

/// Rejected job mutations.
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("Cannot apply '{update}' to a job in state {from}")]
    InvalidTransition {
        from: MixJobStatus,
        update: &'static str,
    },

    #[error("Progress cannot go from {current}% to {requested}%")]
    ProgressRegression { current: u8, requested: u8 },
}

/// A mix request being tracked by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixJob {
    pub id: String,
    pub status: MixJobStatus,
    pub progress: u8,
    /// Output artifact filename, set together with COMPLETED.
    pub result_ref: Option<String>,
    /// Waveform preview of the output, set together with COMPLETED.
    pub waveform: Option<Vec<WaveformPoint>>,
    pub error_message: Option<String>,
    pub target_filename: String,
    pub reference_filename: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl MixJob {
    pub fn new(id: &str, target_filename: &str, reference_filename: &str) -> Self {
        Self {
            id: id.to_string(),
            status: MixJobStatus::Queued,
            progress: 0,
            result_ref: None,
            waveform: None,
            error_message: None,
            target_filename: target_filename.to_string(),
            reference_filename: reference_filename.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Apply an update, leaving the job untouched if the transition is invalid.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), TransitionError> {
        let invalid = |from: MixJobStatus, update: &JobUpdate| TransitionError::InvalidTransition {
            from,
            update: update.name(),
        };

        match update {
            JobUpdate::Start => {
                if self.status != MixJobStatus::Queued {
                    return Err(invalid(self.status, &JobUpdate::Start));
                }
                self.status = MixJobStatus::Processing;
                self.progress = 0;
                self.started_at = Some(chrono::Utc::now().timestamp_millis());
            }
            JobUpdate::Progress(requested) => {
                if self.status != MixJobStatus::Processing {
                    return Err(invalid(self.status, &update));
                }
                let requested = requested.min(100);
                if requested < self.progress {
                    return Err(TransitionError::ProgressRegression {
                        current: self.progress,
                        requested,
                    });
                }
                self.progress = requested;
            }
            JobUpdate::Complete { .. } | JobUpdate::Fail { .. }
                if self.status != MixJobStatus::Processing =>
            {
                return Err(invalid(self.status, &update));
            }
            JobUpdate::Complete {
                result_ref,
                waveform,
            } => {
                self.status = MixJobStatus::Completed;
                self.progress = 100;
                self.result_ref = Some(result_ref);
                self.waveform = Some(waveform);
                self.finished_at = Some(chrono::Utc::now().timestamp_millis());
            }
            JobUpdate::Fail { error } => {
                self.status = MixJobStatus::Failed;
                self.error_message = Some(error);
                self.finished_at = Some(chrono::Utc::now().timestamp_millis());
            }
        }

        Ok(())
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl JobCounts {
    pub fn record(&mut self, status: MixJobStatus) {
        match status {
            MixJobStatus::Queued => self.queued += 1,
            MixJobStatus::Processing => self.processing += 1,
            MixJobStatus::Completed => self.completed += 1,
            MixJobStatus::Failed => self.failed += 1,
        }
        self.total += 1;
    }
}
