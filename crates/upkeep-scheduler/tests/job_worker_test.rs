// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the job worker and the embedded runtime.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::*;
use upkeep_core::CoreError;
use upkeep_core::collaborators::PersistedNotifier;
use upkeep_core::effects::{Effects, flush_effects};
use upkeep_core::jobs::{Job, JobExecutor};
use upkeep_core::model::Measurement;
use upkeep_core::persistence::{JobQueue, Persistence, QueuedJob, SqlitePersistence};
use upkeep_scheduler::daily_scheduler::DailySchedulerConfig;
use upkeep_scheduler::job_worker::{JobWorker, JobWorkerConfig, WorkerBatchReport};
use upkeep_scheduler::runtime::SchedulerRuntime;

async fn enqueue(h: &Harness, job: &Job) -> i64 {
    h.store
        .enqueue_job(job.name(), &job.to_payload().unwrap(), h.now())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_failing_job_retries_with_backoff_then_dies() {
    let h = Harness::new(at(2026, 11, 2, 8)).await;
    enqueue(
        &h,
        &Job::PropagateOrigin {
            origin_id: 4040,
            scalar_fields_changed: true,
            tasks_changed: false,
        },
    )
    .await;
    let worker = h.worker(JobWorkerConfig {
        max_attempts: 2,
        retry_backoff: StdDuration::from_secs(30),
        ..fast_worker_config()
    });

    let report = worker.process_batch().await.unwrap();
    assert_eq!(
        report,
        WorkerBatchReport {
            claimed: 1,
            retried: 1,
            ..Default::default()
        }
    );
    assert_eq!(h.store.count_jobs("pending").await.unwrap(), 1);

    // Not before the backoff elapsed.
    assert_eq!(worker.process_batch().await.unwrap().claimed, 0);

    h.clock.advance(Duration::seconds(31));
    let report = worker.process_batch().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.dead, 1);
    assert_eq!(h.store.count_jobs("dead").await.unwrap(), 1);
    assert_eq!(h.store.count_jobs("pending").await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_payload_is_dead_immediately() {
    let h = Harness::new(at(2026, 11, 2, 8)).await;
    h.store
        .enqueue_job("notify", "{\"type\":\"unknown\"}", h.now())
        .await
        .unwrap();

    let report = h.worker(fast_worker_config()).process_batch().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.dead, 1);
    assert_eq!(h.store.count_jobs("dead").await.unwrap(), 1);
}

#[tokio::test]
async fn test_worker_completes_history_and_notification_jobs() {
    let h = Harness::new(at(2026, 11, 2, 8)).await;
    let entity = h.entity("Tram 3").await;
    let template = h.template(entity, Measurement::Day, 10).await;

    let mut effects = Effects::new();
    effects.notify(88, "Brake pads worn", None);
    effects.history(template.id, Some(88), "task_completed", Some("Brakes".into()));
    flush_effects(effects, h.store.as_ref(), h.clock.as_ref()).await;

    let report = h.worker(fast_worker_config()).process_batch().await.unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(h.store.count_jobs("done").await.unwrap(), 2);
    assert_eq!(h.store.list_notifications(88).await.unwrap().len(), 1);

    let history = h.store.list_history(template.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, "task_completed");
    assert_eq!(history[0].actor_id, Some(88));
}

#[tokio::test]
async fn test_runtime_runs_startup_generation_and_drains_queue() {
    let h = Harness::new(at(2026, 11, 2, 8)).await;
    let entity = h.entity("Tram 5").await;
    let template = h.template(entity, Measurement::Day, 1).await;

    let mut effects = Effects::new();
    effects.notify(77, "Welcome aboard", None);
    flush_effects(effects, h.store.as_ref(), h.clock.as_ref()).await;

    let runtime = SchedulerRuntime::builder()
        .persistence(h.store.clone())
        .queue(h.store.clone())
        .clock(h.clock.clone())
        .scheduler_config(DailySchedulerConfig {
            run_on_startup: true,
            ..Default::default()
        })
        .worker_config(fast_worker_config())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let mut ready = false;
    for _ in 0..250 {
        let copies = h.copies_of(template.id).await;
        let delivered = h.store.list_notifications(77).await.unwrap().len();
        if copies == 1 && delivered == 1 {
            ready = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }

    runtime.shutdown().await.unwrap();
    assert!(ready, "startup generation or job delivery did not happen");
    assert_eq!(h.store.list_checklists(entity).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_runtime_builder_requires_stores() {
    let h = Harness::new(at(2026, 11, 2, 8)).await;

    let err = SchedulerRuntime::builder()
        .queue(h.store.clone())
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("persistence"));

    let err = SchedulerRuntime::builder()
        .persistence(h.store.clone())
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("queue"));
}

/// Queue that cannot record completion of one job.
struct StuckCompletion {
    inner: Arc<SqlitePersistence>,
    stuck_id: i64,
}

#[async_trait]
impl JobQueue for StuckCompletion {
    async fn enqueue_job(
        &self,
        job_name: &str,
        payload: &str,
        run_at: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        self.inner.enqueue_job(job_name, payload, run_at).await
    }

    async fn claim_jobs(
        &self,
        now: DateTime<Utc>,
        visible_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueuedJob>, CoreError> {
        self.inner.claim_jobs(now, visible_until, limit).await
    }

    async fn complete_job(&self, id: i64) -> Result<(), CoreError> {
        if id == self.stuck_id {
            return Err(CoreError::DatabaseError {
                operation: "complete_job".to_string(),
                details: "database is locked".to_string(),
            });
        }
        self.inner.complete_job(id).await
    }

    async fn fail_job(
        &self,
        id: i64,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        self.inner.fail_job(id, error, retry_at).await
    }

    async fn count_jobs(&self, status: &str) -> Result<i64, CoreError> {
        self.inner.count_jobs(status).await
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        self.inner
            .try_acquire_lease(name, holder, now, expires_at)
            .await
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), CoreError> {
        self.inner.release_lease(name, holder).await
    }
}

fn notify(user_id: i64) -> Job {
    Job::Notify {
        dedup_key: format!("worker-test-{user_id}"),
        user_id,
        body: "Oil change due".to_string(),
        link: None,
    }
}

#[tokio::test]
async fn test_unrecorded_result_does_not_abort_batch() {
    let h = Harness::new(at(2026, 11, 2, 8)).await;
    let first = enqueue(&h, &notify(1)).await;
    enqueue(&h, &notify(2)).await;

    let queue = Arc::new(StuckCompletion {
        inner: h.store.clone(),
        stuck_id: first,
    });
    let notifier = PersistedNotifier::new(h.store.clone(), h.clock.clone());
    let worker = JobWorker::new(
        queue,
        JobExecutor::new(h.ctx.clone(), Arc::new(notifier)),
        h.clock.clone(),
        fast_worker_config(),
    );

    let report = worker.process_batch().await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.store.count_jobs("done").await.unwrap(), 1);
    // The stuck job stays claimed until its visibility expires.
    assert_eq!(h.store.count_jobs("running").await.unwrap(), 1);
}
