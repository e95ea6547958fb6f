// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for upkeep-scheduler.
//!
//! [`SchedulerRuntime`] runs the daily scheduler and the job worker as tokio
//! tasks, so the scheduler can live inside an existing application instead
//! of running as a standalone binary.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use upkeep_core::persistence::PostgresPersistence;
//! use upkeep_scheduler::runtime::SchedulerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let store = Arc::new(PostgresPersistence::new(pool));
//!
//!     let runtime = SchedulerRuntime::builder()
//!         .persistence(store.clone())
//!         .queue(store)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};
use upkeep_core::MaintenanceContext;
use upkeep_core::clock::{Clock, SystemClock};
use upkeep_core::collaborators::{NotificationDispatch, PersistedNotifier};
use upkeep_core::jobs::JobExecutor;
use upkeep_core::persistence::{JobQueue, Persistence};

use crate::daily_scheduler::{DailyScheduler, DailySchedulerConfig};
use crate::job_worker::{JobWorker, JobWorkerConfig};

/// Builder for creating a [`SchedulerRuntime`].
#[derive(Default)]
pub struct SchedulerRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    queue: Option<Arc<dyn JobQueue>>,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<dyn NotificationDispatch>>,
    scheduler_config: DailySchedulerConfig,
    worker_config: JobWorkerConfig,
}

impl SchedulerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entity & template store (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the background queue (required).
    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the time source.
    ///
    /// Default: [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the notification sink.
    ///
    /// Default: [`PersistedNotifier`] writing through the configured persistence.
    pub fn notifier(mut self, notifier: Arc<dyn NotificationDispatch>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the daily scheduler configuration.
    pub fn scheduler_config(mut self, config: DailySchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    /// Set the job worker configuration.
    pub fn worker_config(mut self, config: JobWorkerConfig) -> Self {
        self.worker_config = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<SchedulerRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        let queue = self
            .queue
            .ok_or_else(|| anyhow::anyhow!("queue is required"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let notifier = self.notifier.unwrap_or_else(|| {
            Arc::new(PersistedNotifier::new(persistence.clone(), clock.clone()))
        });

        Ok(SchedulerRuntimeConfig {
            persistence,
            queue,
            clock,
            notifier,
            scheduler_config: self.scheduler_config,
            worker_config: self.worker_config,
        })
    }
}

/// Configuration for a [`SchedulerRuntime`].
pub struct SchedulerRuntimeConfig {
    persistence: Arc<dyn Persistence>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationDispatch>,
    scheduler_config: DailySchedulerConfig,
    worker_config: JobWorkerConfig,
}

impl SchedulerRuntimeConfig {
    /// Start the daily scheduler and job worker tasks.
    pub async fn start(self) -> Result<SchedulerRuntime> {
        let ctx = MaintenanceContext::new(self.persistence).with_clock(self.clock.clone());

        let scheduler = DailyScheduler::new(ctx.clone(), self.queue.clone(), self.scheduler_config)?;
        let scheduler_shutdown = scheduler.shutdown_handle();
        let cancel = scheduler.cancel_handle();

        let scheduler_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        let worker = JobWorker::new(
            self.queue,
            JobExecutor::new(ctx, self.notifier),
            self.clock,
            self.worker_config,
        );
        let worker_shutdown = worker.shutdown_handle();

        let worker_handle = tokio::spawn(async move {
            worker.run().await;
        });

        info!("SchedulerRuntime started");

        Ok(SchedulerRuntime {
            scheduler_handle,
            worker_handle,
            scheduler_shutdown,
            worker_shutdown,
            cancel,
        })
    }
}

/// A running scheduler that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct SchedulerRuntime {
    scheduler_handle: JoinHandle<()>,
    worker_handle: JoinHandle<()>,
    scheduler_shutdown: Arc<Notify>,
    worker_shutdown: Arc<Notify>,
    cancel: Arc<AtomicBool>,
}

impl SchedulerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SchedulerRuntimeBuilder {
        SchedulerRuntimeBuilder::new()
    }

    /// Gracefully shut down the runtime.
    ///
    /// An in-flight generation run stops between records; the job worker
    /// finishes its current batch.
    pub async fn shutdown(self) -> Result<()> {
        info!("SchedulerRuntime shutting down...");

        self.cancel.store(true, Ordering::Relaxed);
        self.scheduler_shutdown.notify_one();
        self.worker_shutdown.notify_one();

        if let Err(e) = self.scheduler_handle.await {
            error!("Daily scheduler task panicked: {}", e);
        }
        if let Err(e) = self.worker_handle.await {
            error!("Job worker task panicked: {}", e);
        }

        info!("SchedulerRuntime shutdown complete");
        Ok(())
    }
}
