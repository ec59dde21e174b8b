//! Audio mix jobs: receiving uploads, tracking jobs and running the matcher.

mod dispatcher;
mod file_handler;
mod manager;
mod models;
mod processor;
mod runner;
mod store;
mod upload;

pub use dispatcher::{create_dispatcher, DispatchError, DispatcherWorker, JobDispatcher, MixTask};
pub use file_handler::{FileHandler, UploadError, UploadRole, DEFAULT_ALLOWED_EXTENSIONS};
pub use manager::{MixError, MixManager};
pub use models::{JobCounts, JobUpdate, MixJob, MixJobStatus, TransitionError, WaveformPoint};
pub use processor::{
    compute_waveform, AudioMatcher, CommandMatcher, FfmpegWaveformExtractor, ProcessingError,
    WaveformExtractor, DEFAULT_MATCHER_COMMAND,
};
pub use runner::{JobRunner, RunnerError, DEFAULT_WAVEFORM_POINTS, PROGRESS_AFTER_MATCH};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use upload::{SessionFile, UploadSession};
