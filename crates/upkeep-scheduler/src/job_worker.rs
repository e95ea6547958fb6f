// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background job worker.
//!
//! Polls the `job_queue` table, executes claimed jobs and completes them.
//! A failed job is rescheduled with linear backoff (`retry_backoff × attempts`)
//! until `max_attempts` deliveries, then marked dead. A claimed job whose
//! worker died becomes visible again after `visibility_timeout`; handlers are
//! idempotent, so the redelivery is harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use upkeep_core::clock::Clock;
use upkeep_core::jobs::{Job, JobExecutor};
use upkeep_core::persistence::{JobQueue, QueuedJob};

use crate::error::{Error, Result};

/// Job worker configuration.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// How often to poll for jobs
    pub poll_interval: Duration,
    /// Maximum jobs claimed per poll
    pub batch_size: i64,
    /// Deliveries before a job is marked dead
    pub max_attempts: i32,
    /// How long a claimed job stays invisible to other workers
    pub visibility_timeout: Duration,
    /// Base delay between retries
    pub retry_backoff: Duration,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 20,
            max_attempts: 5,
            visibility_timeout: Duration::from_secs(300), // 5 minutes
            retry_backoff: Duration::from_secs(30),
        }
    }
}

/// Counters for one claimed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerBatchReport {
    /// Jobs claimed.
    pub claimed: usize,
    /// Jobs completed.
    pub completed: usize,
    /// Jobs rescheduled after a failure.
    pub retried: usize,
    /// Jobs marked dead.
    pub dead: usize,
    /// Jobs whose result could not be written back; logged and left to
    /// redelivery.
    pub failed: usize,
}

enum Settled {
    Completed,
    Retried,
    Dead,
}

/// Worker that drains the background queue.
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    executor: JobExecutor,
    clock: Arc<dyn Clock>,
    config: JobWorkerConfig,
    shutdown: Arc<Notify>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        executor: JobExecutor,
        clock: Arc<dyn Clock>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            clock,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "Job worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Job worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.drain().await;
                }
            }
        }

        info!("Job worker stopped");
    }

    /// Process batches until the queue has no more deliverable jobs.
    async fn drain(&self) {
        loop {
            match self.process_batch().await {
                Ok(report) => {
                    if report.claimed > 0 {
                        debug!(
                            claimed = report.claimed,
                            completed = report.completed,
                            retried = report.retried,
                            dead = report.dead,
                            failed = report.failed,
                            "Processed job batch"
                        );
                    }
                    if (report.claimed as i64) < self.config.batch_size {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to process job batch");
                    break;
                }
            }
        }
    }

    /// Claim and process one batch of jobs.
    pub async fn process_batch(&self) -> Result<WorkerBatchReport> {
        let now = self.clock.now();
        let visible_until = now + to_chrono(self.config.visibility_timeout)?;
        let jobs = self
            .queue
            .claim_jobs(now, visible_until, self.config.batch_size)
            .await?;

        let mut report = WorkerBatchReport {
            claimed: jobs.len(),
            ..Default::default()
        };

        for queued in &jobs {
            match self.settle(queued).await {
                Ok(Settled::Completed) => report.completed += 1,
                Ok(Settled::Retried) => report.retried += 1,
                Ok(Settled::Dead) => report.dead += 1,
                Err(e) => {
                    error!(
                        job_id = queued.id,
                        job_name = %queued.job_name,
                        error = %e,
                        "Failed to record job result, job reappears after its visibility timeout"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Execute one claimed job and record its result in the queue.
    async fn settle(&self, queued: &QueuedJob) -> Result<Settled> {
        let job = match Job::from_payload(&queued.payload) {
            Ok(job) => job,
            Err(e) => {
                error!(
                    job_id = queued.id,
                    job_name = %queued.job_name,
                    error = %e,
                    "Malformed job payload, marking dead"
                );
                self.queue
                    .fail_job(queued.id, &e.to_string(), None)
                    .await?;
                return Ok(Settled::Dead);
            }
        };

        match self.executor.execute(&job).await {
            Ok(_) => {
                self.queue.complete_job(queued.id).await?;
                Ok(Settled::Completed)
            }
            Err(e) => {
                if self.reschedule(queued, &e.to_string()).await? {
                    Ok(Settled::Retried)
                } else {
                    Ok(Settled::Dead)
                }
            }
        }
    }

    /// Reschedule a failed job, or mark it dead. Returns whether it will retry.
    async fn reschedule(&self, queued: &QueuedJob, error: &str) -> Result<bool> {
        if queued.attempts >= self.config.max_attempts {
            warn!(
                job_id = queued.id,
                job_name = %queued.job_name,
                attempts = queued.attempts,
                error,
                "Job exhausted its attempts, marking dead"
            );
            self.queue.fail_job(queued.id, error, None).await?;
            return Ok(false);
        }

        let backoff = self.config.retry_backoff * queued.attempts.max(1) as u32;
        let retry_at = self.clock.now() + to_chrono(backoff)?;
        warn!(
            job_id = queued.id,
            job_name = %queued.job_name,
            attempts = queued.attempts,
            %retry_at,
            error,
            "Job failed, retrying later"
        );
        self.queue.fail_job(queued.id, error, Some(retry_at)).await?;
        Ok(true)
    }
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| Error::Other(format!("Invalid duration: {}", e)))
}
