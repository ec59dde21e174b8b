//! Hands accepted jobs to the runner without holding up the request.
//!
//! Submission pushes onto an unbounded channel and returns immediately. A
//! single worker task drains the channel and runs each job on its own task,
//! optionally capped by a semaphore. On shutdown the worker stops taking new
//! jobs but runs everything already submitted to completion.

use super::models::MixJobStatus;
use super::runner::JobRunner;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Everything the runner needs to process one job.
#[derive(Debug, Clone)]
pub struct MixTask {
    pub job_id: String,
    pub target_path: PathBuf,
    pub reference_path: PathBuf,
    pub output_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Job dispatcher is not accepting work")]
    Closed(MixTask),
}

/// Cloneable submission handle.
#[derive(Clone)]
pub struct JobDispatcher {
    tx: mpsc::UnboundedSender<MixTask>,
}

impl JobDispatcher {
    /// Queue a job. Never waits for the job to start.
    pub fn dispatch(&self, task: MixTask) -> Result<(), DispatchError> {
        self.tx
            .send(task)
            .map_err(|mpsc::error::SendError(task)| DispatchError::Closed(task))
    }
}

/// Background task that owns the receiving side.
pub struct DispatcherWorker {
    rx: mpsc::UnboundedReceiver<MixTask>,
    runner: Arc<JobRunner>,
    limit: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

/// Create a dispatcher and the worker that serves it.
///
/// `max_concurrent` of `None` (or zero) leaves concurrency unbounded.
pub fn create_dispatcher(
    runner: Arc<JobRunner>,
    max_concurrent: Option<usize>,
    shutdown: CancellationToken,
) -> (JobDispatcher, DispatcherWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let limit = max_concurrent
        .filter(|n| *n > 0)
        .map(|n| Arc::new(Semaphore::new(n)));

    (
        JobDispatcher { tx },
        DispatcherWorker {
            rx,
            runner,
            limit,
            shutdown,
        },
    )
}

impl DispatcherWorker {
    pub async fn run(mut self) {
        info!("Job dispatcher started");
        let mut running: JoinSet<Option<MixJobStatus>> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Job dispatcher shutting down");
                    break;
                }
                task = self.rx.recv() => {
                    match task {
                        Some(task) => self.spawn(&mut running, task),
                        None => {
                            debug!("All dispatcher handles dropped");
                            break;
                        }
                    }
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    log_join(joined);
                }
            }
        }

        // Anything already accepted still runs.
        self.rx.close();
        while let Some(task) = self.rx.recv().await {
            self.spawn(&mut running, task);
        }

        if !running.is_empty() {
            info!("Waiting for {} job(s) to finish", running.len());
        }
        while let Some(joined) = running.join_next().await {
            log_join(joined);
        }
        info!("Job dispatcher stopped");
    }

    fn spawn(&self, running: &mut JoinSet<Option<MixJobStatus>>, task: MixTask) {
        debug!("Dispatching job {}", task.job_id);
        let runner = self.runner.clone();
        let limit = self.limit.clone();

        running.spawn(async move {
            let _permit = match limit {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => None,
                },
                None => None,
            };
            runner.run(task).await
        });
    }
}

fn log_join(joined: Result<Option<MixJobStatus>, tokio::task::JoinError>) {
    match joined {
        Ok(Some(status)) => debug!("Job task finished with status {}", status),
        Ok(None) => debug!("Job task finished without running"),
        Err(e) => error!("Job task aborted: {}", e),
    }
}
