// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for upkeep-scheduler integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use upkeep_core::MaintenanceContext;
use upkeep_core::clock::{Clock, FixedClock};
use upkeep_core::collaborators::PersistedNotifier;
use upkeep_core::jobs::JobExecutor;
use upkeep_core::maintenance::{self, NewOrigin};
use upkeep_core::model::{EntityKind, EntityStatus, MaintenanceDefinition, Measurement, NewEntity};
use upkeep_core::persistence::{Persistence, SqlitePersistence};
use upkeep_scheduler::daily_scheduler::{DailyScheduler, DailySchedulerConfig};
use upkeep_scheduler::job_worker::{JobWorker, JobWorkerConfig};

/// UTC instant helper.
pub fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

/// Scheduler config that never fires on its own during a test.
pub fn quiet_scheduler_config() -> DailySchedulerConfig {
    DailySchedulerConfig {
        run_on_startup: false,
        ..Default::default()
    }
}

/// Worker config with a short poll interval.
pub fn fast_worker_config() -> JobWorkerConfig {
    JobWorkerConfig {
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

/// In-memory store and fixed clock.
pub struct Harness {
    pub ctx: MaintenanceContext,
    pub store: Arc<SqlitePersistence>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub async fn new(now: DateTime<Utc>) -> Self {
        let store = Arc::new(
            SqlitePersistence::in_memory()
                .await
                .expect("Failed to create in-memory SQLite persistence"),
        );
        let clock = Arc::new(FixedClock::new(now));
        let ctx = MaintenanceContext::new(store.clone()).with_clock(clock.clone());
        Self { ctx, store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn scheduler(&self, config: DailySchedulerConfig) -> DailyScheduler {
        DailyScheduler::new(self.ctx.clone(), self.store.clone(), config)
            .expect("Failed to create scheduler")
    }

    pub fn worker(&self, config: JobWorkerConfig) -> JobWorker {
        let notifier = PersistedNotifier::new(self.store.clone(), self.clock.clone());
        JobWorker::new(
            self.store.clone(),
            JobExecutor::new(self.ctx.clone(), Arc::new(notifier)),
            self.clock.clone(),
            config,
        )
    }

    pub async fn entity(&self, name: &str) -> i64 {
        self.store
            .create_entity(
                &NewEntity {
                    kind: EntityKind::Transportation,
                    name: name.to_string(),
                    status: EntityStatus::Working,
                },
                self.now(),
            )
            .await
            .expect("Failed to create entity")
            .id
    }

    /// Origin assigned to `entity_id`; returns the Template.
    pub async fn template(
        &self,
        entity_id: i64,
        measurement: Measurement,
        value: i64,
    ) -> MaintenanceDefinition {
        let (origin, _) = maintenance::create_origin(
            &self.ctx,
            NewOrigin {
                name: "Service".to_string(),
                description: None,
                measurement,
                value,
            },
            None,
        )
        .await
        .expect("Failed to create origin");
        let (template, _) = maintenance::assign_origin(&self.ctx, origin.id, entity_id, None)
            .await
            .expect("Failed to assign origin");
        template
    }

    pub async fn copies_of(&self, template_id: i64) -> usize {
        self.store
            .list_definitions(upkeep_core::model::DefinitionKind::Copy, Some(template_id))
            .await
            .unwrap()
            .len()
    }
}
