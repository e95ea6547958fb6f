// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daily generation and reminder scheduler.
//!
//! Two cron schedules drive the daily jobs:
//! - generation: maintenance Copies, then daily/weekly checklists
//! - reminders: evaluate reminder rules and enqueue notifications
//!
//! Each job is single-flight. Inside the process a `try_lock` on a per-job
//! mutex skips overlapping runs; across processes a named lease row in
//! `job_leases` does the same. A run that cannot get either is skipped and
//! logged. The engine operations are idempotent per day, so a skipped or
//! repeated run never duplicates work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};
use upkeep_core::MaintenanceContext;
use upkeep_core::checklist::generate_checklists;
use upkeep_core::effects::flush_effects;
use upkeep_core::generation::{
    DEFAULT_BATCH_SIZE, GenerationOptions, GenerationReport, generate_periodic_maintenances,
};
use upkeep_core::persistence::JobQueue;
use upkeep_core::reminder::{ReminderReport, notification_reminder};

use crate::error::{Error, Result};
use crate::schedule::Schedule;

/// Lease name guarding copy and checklist generation.
pub const GENERATION_LEASE: &str = "daily_generation";
/// Lease name guarding the reminder run.
pub const REMINDER_LEASE: &str = "notification_reminder";

/// Daily scheduler configuration.
#[derive(Debug, Clone)]
pub struct DailySchedulerConfig {
    /// Cron for copy and checklist generation
    pub generation_schedule: String,
    /// Cron for reminders
    pub reminder_schedule: String,
    /// Run both jobs once when the scheduler starts
    pub run_on_startup: bool,
    /// Records per chunk
    pub batch_size: usize,
    /// Lifetime of the cross-process lease
    pub lease_ttl: Duration,
}

impl Default for DailySchedulerConfig {
    fn default() -> Self {
        Self {
            generation_schedule: "0 5 * * *".to_string(),
            reminder_schedule: "0 6 * * *".to_string(),
            run_on_startup: true,
            batch_size: DEFAULT_BATCH_SIZE,
            lease_ttl: Duration::from_secs(3600),
        }
    }
}

/// Result of one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRun {
    /// Maintenance Copies.
    pub maintenances: GenerationReport,
    /// Checklists.
    pub checklists: GenerationReport,
}

/// Result of one reminder run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderRun {
    /// Rule counters.
    pub report: ReminderReport,
    /// Jobs written to the queue.
    pub enqueued: usize,
}

/// Scheduler for the daily jobs.
pub struct DailyScheduler {
    ctx: MaintenanceContext,
    queue: Arc<dyn JobQueue>,
    config: DailySchedulerConfig,
    generation_schedule: Schedule,
    reminder_schedule: Schedule,
    holder: String,
    generation_lock: Mutex<()>,
    reminder_lock: Mutex<()>,
    cancel: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl DailyScheduler {
    /// Create a scheduler. Fails if either cron expression does not parse.
    pub fn new(
        ctx: MaintenanceContext,
        queue: Arc<dyn JobQueue>,
        config: DailySchedulerConfig,
    ) -> Result<Self> {
        let generation_schedule = Schedule::parse(&config.generation_schedule)?;
        let reminder_schedule = Schedule::parse(&config.reminder_schedule)?;
        Ok(Self {
            ctx,
            queue,
            config,
            generation_schedule,
            reminder_schedule,
            holder: format!("upkeep-scheduler-{}", uuid::Uuid::new_v4()),
            generation_lock: Mutex::new(()),
            reminder_lock: Mutex::new(()),
            cancel: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Flag that stops an in-flight run between records.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Lease holder identity of this scheduler.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Run the scheduler loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            generation_schedule = self.generation_schedule.expression(),
            reminder_schedule = self.reminder_schedule.expression(),
            run_on_startup = self.config.run_on_startup,
            holder = %self.holder,
            "Daily scheduler started"
        );

        if self.config.run_on_startup {
            self.tick_generation().await;
            self.tick_reminders().await;
        }

        loop {
            let now = self.ctx.clock.now();
            let (next_generation, next_reminder) = match (
                self.generation_schedule.next_after(now),
                self.reminder_schedule.next_after(now),
            ) {
                (Ok(generation), Ok(reminder)) => (generation, reminder),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Cannot compute next run, stopping daily scheduler");
                    break;
                }
            };
            let next = next_generation.min(next_reminder);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(%next, wait_secs = wait.as_secs(), "Daily scheduler sleeping");

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Daily scheduler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(wait) => {
                    if next_generation <= next {
                        self.tick_generation().await;
                    }
                    if next_reminder <= next {
                        self.tick_reminders().await;
                    }
                }
            }
        }

        info!("Daily scheduler stopped");
    }

    async fn tick_generation(&self) {
        match self.run_generation().await {
            Ok(Some(run)) => info!(
                copies_created = run.maintenances.created,
                copies_failed = run.maintenances.failed,
                checklists_created = run.checklists.created,
                checklists_failed = run.checklists.failed,
                "Generation run finished"
            ),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Generation run failed"),
        }
    }

    async fn tick_reminders(&self) {
        match self.run_reminders().await {
            Ok(Some(run)) => info!(
                fired = run.report.fired,
                enqueued = run.enqueued,
                "Reminder run finished"
            ),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Reminder run failed"),
        }
    }

    /// Generate today's Copies and checklists.
    ///
    /// Returns `None` when another run holds the in-process lock or the lease.
    pub async fn run_generation(&self) -> Result<Option<GenerationRun>> {
        let Ok(_guard) = self.generation_lock.try_lock() else {
            warn!("Generation already running in this process, skipping");
            return Ok(None);
        };
        if !self.acquire_lease(GENERATION_LEASE).await? {
            return Ok(None);
        }

        let options = self.generation_options();
        let result = async {
            let maintenances = generate_periodic_maintenances(&self.ctx, &options).await?;
            let checklists = generate_checklists(&self.ctx, &options).await?;
            Ok::<_, Error>(GenerationRun {
                maintenances,
                checklists,
            })
        }
        .await;

        self.release_lease(GENERATION_LEASE).await;
        result.map(Some)
    }

    /// Evaluate reminder rules and enqueue the planned notifications.
    ///
    /// Returns `None` when another run holds the in-process lock or the lease.
    pub async fn run_reminders(&self) -> Result<Option<ReminderRun>> {
        let Ok(_guard) = self.reminder_lock.try_lock() else {
            warn!("Reminder run already in progress in this process, skipping");
            return Ok(None);
        };
        if !self.acquire_lease(REMINDER_LEASE).await? {
            return Ok(None);
        }

        let options = self.generation_options();
        let result = async {
            let (report, effects) = notification_reminder(&self.ctx, &options).await?;
            let enqueued =
                flush_effects(effects, self.queue.as_ref(), self.ctx.clock.as_ref()).await;
            Ok::<_, Error>(ReminderRun { report, enqueued })
        }
        .await;

        self.release_lease(REMINDER_LEASE).await;
        result.map(Some)
    }

    fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            batch_size: self.config.batch_size,
            cancel: self.cancel.clone(),
        }
    }

    async fn acquire_lease(&self, name: &str) -> Result<bool> {
        if self.cancel.load(Ordering::Relaxed) {
            debug!(lease = name, "Scheduler cancelled, not starting run");
            return Ok(false);
        }

        let now = self.ctx.clock.now();
        let ttl = chrono::Duration::from_std(self.config.lease_ttl)
            .map_err(|e| Error::Other(format!("Invalid lease TTL: {}", e)))?;
        let acquired = self
            .queue
            .try_acquire_lease(name, &self.holder, now, now + ttl)
            .await?;
        if !acquired {
            info!(lease = name, "Lease held by another scheduler, skipping run");
        }
        Ok(acquired)
    }

    async fn release_lease(&self, name: &str) {
        if let Err(e) = self.queue.release_lease(name, &self.holder).await {
            warn!(lease = name, error = %e, "Failed to release lease");
        }
    }
}
