// Job queue for index builds
// Jobs live in SQLite; a worker claims one at a time and never two of the same project

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::database::sqlite::Database;
use crate::database::sqlite::models::Job;
use crate::database::sqlite::queries::{JobQueries, JobStats};
use crate::errors::PipelineError;
use crate::indexer::ProjectProcessor;

/// Queue processing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempts a job gets before it is failed for good
    pub max_attempts: u32,
    /// Running jobs without a heartbeat for this long are considered dead and failed
    pub processing_timeout_seconds: u64,
    /// Delay between polls when the queue is empty
    pub poll_interval_ms: u64,
    /// How often a worker refreshes the heartbeat of the job it runs
    pub heartbeat_interval_ms: u64,
}

impl Default for QueueConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 3,
            processing_timeout_seconds: 1800, // 30 minutes
            poll_interval_ms: 1000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl QueueConfig {
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[inline]
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_seconds)
    }
}

/// SQLite-backed queue of project build jobs
#[derive(Debug, Clone)]
pub struct JobQueue {
    database: Database,
    config: QueueConfig,
}

impl JobQueue {
    #[inline]
    pub fn new(database: Database, config: QueueConfig) -> Self {
        Self { database, config }
    }

    #[inline]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Queue a build of the project, returning the job handle
    ///
    /// A project that already has a pending job gets that job back instead
    /// of a second one.
    #[inline]
    pub async fn submit(&self, project_id: i64, user_id: i64) -> Result<Job> {
        let project = self.database.require_project(user_id, project_id).await?;

        if let Some(job) =
            JobQueries::find_pending_for_project(self.database.pool(), project.id).await?
        {
            debug!("Project {} already has pending job {}", project.id, job.id);
            return Ok(job);
        }

        let id = Uuid::new_v4().to_string();
        let job = JobQueries::create(self.database.pool(), &id, project.id, user_id).await?;
        info!("Submitted job {} for project {}", job.id, project.name);
        Ok(job)
    }

    #[inline]
    pub async fn status(&self, job_id: &str) -> Result<Option<Job>> {
        JobQueries::get_by_id(self.database.pool(), job_id).await
    }

    #[inline]
    pub async fn stats(&self) -> Result<JobStats> {
        JobQueries::stats(self.database.pool()).await
    }

    /// Fail running jobs whose heartbeat is older than the processing timeout
    #[inline]
    pub async fn fail_stale_jobs(&self) -> Result<u64> {
        let timeout = chrono::Duration::from_std(self.config.processing_timeout())
            .context("Processing timeout out of range")?;
        let cutoff = Utc::now().naive_utc() - timeout;
        let failed = JobQueries::fail_stale(
            self.database.pool(),
            cutoff,
            &format!(
                "Job timed out after {} seconds",
                self.config.processing_timeout_seconds
            ),
        )
        .await?;
        if failed > 0 {
            warn!("Failed {} stale jobs", failed);
        }
        Ok(failed)
    }

    /// Claim the next runnable job, if any
    #[inline]
    pub async fn claim(&self) -> Result<Option<Job>> {
        self.fail_stale_jobs().await?;
        let job = JobQueries::claim_next(self.database.pool()).await?;
        if let Some(job) = &job {
            debug!(
                "Claimed job {} for project {} (attempt {})",
                job.id, job.project_id, job.attempts
            );
        }
        Ok(job)
    }

    /// Refresh the heartbeat of a running job
    ///
    /// Returns `false` once the job is no longer running.
    #[inline]
    pub async fn heartbeat(&self, job: &Job) -> Result<bool> {
        JobQueries::heartbeat(self.database.pool(), &job.id).await
    }

    /// Mark a running job succeeded
    ///
    /// Returns `false` when the job stopped running in the meantime (for
    /// example it was failed as stale); its status is then left alone.
    #[inline]
    pub async fn complete(&self, job: &Job, result_message: &str) -> Result<bool> {
        let owned = JobQueries::mark_succeeded(self.database.pool(), &job.id, result_message).await?;
        if owned {
            info!("Job {} succeeded: {}", job.id, result_message);
        } else {
            warn!(
                "Lost ownership of job {}, dropping result: {}",
                job.id, result_message
            );
        }
        Ok(owned)
    }

    /// Record a failed attempt
    ///
    /// Retryable failures go back to `pending` while attempts remain.
    /// Returns `false` when the job was no longer running.
    #[inline]
    pub async fn fail(&self, job: &Job, error_message: &str, retryable: bool) -> Result<bool> {
        let attempts = u32::try_from(job.attempts).unwrap_or(u32::MAX);
        let owned = if retryable && attempts < self.config.max_attempts {
            let owned = JobQueries::requeue(self.database.pool(), &job.id, error_message).await?;
            if owned {
                warn!(
                    "Job {} failed on attempt {}/{}, requeued: {}",
                    job.id, attempts, self.config.max_attempts, error_message
                );
            }
            owned
        } else {
            let owned = JobQueries::mark_failed(self.database.pool(), &job.id, error_message).await?;
            if owned {
                error!("Job {} failed: {}", job.id, error_message);
            }
            owned
        };
        if !owned {
            warn!(
                "Lost ownership of job {}, dropping error: {}",
                job.id, error_message
            );
        }
        Ok(owned)
    }

    /// Poll until the job is finished
    #[inline]
    pub async fn wait_for(&self, job_id: &str) -> Result<Job> {
        loop {
            let job = self
                .status(job_id)
                .await?
                .ok_or_else(|| anyhow!("Job {} not found", job_id))?;
            if job.is_finished() {
                return Ok(job);
            }
            sleep(self.config.poll_interval()).await;
        }
    }
}

/// Whether a processing error may go away on its own
///
/// Pipeline errors are deterministic for the same documents and settings;
/// anything else (database, filesystem) is worth another attempt.
#[inline]
pub fn is_retryable(error: &anyhow::Error) -> bool {
    match error.downcast_ref::<PipelineError>() {
        Some(PipelineError::IndexWrite { .. }) => true,
        Some(_) => false,
        None => true,
    }
}

/// Runs queued jobs through a [`ProjectProcessor`]
pub struct JobWorker {
    queue: JobQueue,
    processor: Arc<ProjectProcessor>,
}

impl JobWorker {
    #[inline]
    pub fn new(queue: JobQueue, processor: Arc<ProjectProcessor>) -> Self {
        Self { queue, processor }
    }

    /// Claim and run one job; `None` when nothing was claimable
    #[inline]
    pub async fn run_once(&self) -> Result<Option<Job>> {
        let Some(job) = self.queue.claim().await? else {
            return Ok(None);
        };

        let heartbeat_handle = self.start_heartbeat_task(&job);
        let result = self.processor.process(job.user_id, job.project_id).await;
        heartbeat_handle.abort();

        match result {
            Ok(outcome) => {
                self.queue.complete(&job, &outcome.to_string()).await?;
            }
            Err(e) => {
                let message = match e.downcast_ref::<PipelineError>() {
                    Some(pipeline_error) => pipeline_error.user_message(),
                    None => format!("{e:#}"),
                };
                self.queue.fail(&job, &message, is_retryable(&e)).await?;
            }
        }

        let finished = self
            .queue
            .status(&job.id)
            .await?
            .ok_or_else(|| anyhow!("Job {} disappeared", job.id))?;
        Ok(Some(finished))
    }

    /// Keep the job's heartbeat fresh until the returned handle is aborted
    fn start_heartbeat_task(&self, job: &Job) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let job = job.clone();
        let interval = self.queue.config().heartbeat_interval();

        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                match queue.heartbeat(&job).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("Job {} is no longer running, stopping heartbeat", job.id);
                        break;
                    }
                    Err(e) => error!("Failed to update heartbeat of job {}: {}", job.id, e),
                }
            }
        })
    }

    /// Run jobs until none is claimable
    #[inline]
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut processed = 0;
        while self.run_once().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// Run jobs forever, sleeping between empty polls
    ///
    /// Errors talking to the queue are logged and retried after the poll
    /// interval; the worker keeps running.
    #[inline]
    pub async fn run(&self) -> Result<()> {
        info!("Job worker started");
        loop {
            match self.run_once().await {
                Ok(Some(_)) => {}
                Ok(None) => sleep(self.queue.config().poll_interval()).await,
                Err(e) => {
                    error!("Error in job worker: {:#}", e);
                    sleep(self.queue.config().poll_interval()).await;
                }
            }
        }
    }
}
