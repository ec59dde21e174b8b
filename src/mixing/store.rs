//! Job registry.
//!
//! The store is the single source of truth for job status. Every mutation of a
//! given job goes through one lock owned by that job, so concurrent updates of
//! the same job are linearized while different jobs never contend.

use super::models::{JobCounts, JobUpdate, MixJob, TransitionError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;

/// Errors returned by job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Rejected update for job {job_id}: {source}")]
    Transition {
        job_id: String,
        #[source]
        source: TransitionError,
    },
}

/// Trait for job storage operations.
///
/// Implementations must serialize updates per job id. Reads return snapshots,
/// never references into live state.
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails if the id is already taken.
    fn create_job(&self, job: MixJob) -> Result<(), JobStoreError>;

    /// Get a snapshot of a job by ID.
    fn get_job(&self, id: &str) -> Result<Option<MixJob>, JobStoreError>;

    /// Atomically apply an update and return the resulting snapshot.
    fn update_job(&self, id: &str, update: JobUpdate) -> Result<MixJob, JobStoreError>;

    /// Snapshot of all jobs, oldest first.
    fn list_jobs(&self) -> Result<Vec<MixJob>, JobStoreError>;

    /// Number of jobs in each status.
    fn count_by_status(&self) -> Result<JobCounts, JobStoreError>;
}

type JobSlot = Arc<Mutex<MixJob>>;

/// In-process job store.
///
/// Records live for the whole process lifetime; there is no eviction.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, JobSlot>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Option<JobSlot> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(id).cloned()
    }

    fn all_slots(&self) -> Vec<JobSlot> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.values().cloned().collect()
    }
}

// A job is only mutated through `MixJob::apply`, which validates before
// writing, so a poisoned lock still guards a consistent record.
fn lock_job(slot: &JobSlot) -> MutexGuard<'_, MixJob> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

impl JobStore for InMemoryJobStore {
    fn create_job(&self, job: MixJob) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id.clone(), Arc::new(Mutex::new(job)));
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<MixJob>, JobStoreError> {
        let Some(slot) = self.slot(id) else {
            return Ok(None);
        };
        let job = lock_job(&slot).clone();
        Ok(Some(job))
    }

    fn update_job(&self, id: &str, update: JobUpdate) -> Result<MixJob, JobStoreError> {
        // The map lock is released before taking the job lock.
        let slot = self
            .slot(id)
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        let mut job = lock_job(&slot);
        job.apply(update)
            .map_err(|source| JobStoreError::Transition {
                job_id: id.to_string(),
                source,
            })?;
        Ok(job.clone())
    }

    fn list_jobs(&self) -> Result<Vec<MixJob>, JobStoreError> {
        let mut jobs: Vec<MixJob> = self
            .all_slots()
            .iter()
            .map(|slot| lock_job(slot).clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    fn count_by_status(&self) -> Result<JobCounts, JobStoreError> {
        let mut counts = JobCounts::default();
        for slot in self.all_slots() {
            counts.record(lock_job(&slot).status);
        }
        Ok(counts)
    }
}
