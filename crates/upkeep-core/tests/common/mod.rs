// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for upkeep-core integration tests.
//!
//! Provides a `Harness` over an in-memory SQLite store and a fixed clock.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use upkeep_core::MaintenanceContext;
use upkeep_core::clock::{Clock, FixedClock, day_window};
use upkeep_core::model::{
    ChecklistType, Entity, EntityKind, EntityStatus, MaintenanceDefinition, Measurement,
    NewChecklist, NewEntity,
};
use upkeep_core::maintenance::{self, NewOrigin};
use upkeep_core::persistence::{Persistence, SqlitePersistence};

/// Skip a Postgres test when no database URL is configured.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        match std::env::var("TEST_UPKEEP_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("Skipping test: TEST_UPKEEP_DATABASE_URL not set");
                return;
            }
        }
    };
}

/// UTC instant helper.
pub fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

/// Store, clock and context wired together.
pub struct Harness {
    pub ctx: MaintenanceContext,
    pub store: Arc<SqlitePersistence>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    /// Fresh migrated database with the clock at `now`.
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

    pub fn today(&self) -> chrono::NaiveDate {
        self.clock.today()
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::days(days));
    }

    pub async fn entity(&self, name: &str) -> Entity {
        self.entity_with_status(name, EntityStatus::Working).await
    }

    pub async fn entity_with_status(&self, name: &str, status: EntityStatus) -> Entity {
        self.store
            .create_entity(
                &NewEntity {
                    kind: EntityKind::Machine,
                    name: name.to_string(),
                    status,
                },
                self.clock.now(),
            )
            .await
            .expect("Failed to create entity")
    }

    pub async fn origin(&self, name: &str, measurement: Measurement, value: i64) -> MaintenanceDefinition {
        let (origin, _) = maintenance::create_origin(
            &self.ctx,
            NewOrigin {
                name: name.to_string(),
                description: None,
                measurement,
                value,
            },
            None,
        )
        .await
        .expect("Failed to create origin");
        origin
    }

    pub async fn assign(&self, origin_id: i64, entity_id: i64) -> MaintenanceDefinition {
        let (template, _) = maintenance::assign_origin(&self.ctx, origin_id, entity_id, None)
            .await
            .expect("Failed to assign origin");
        template
    }

    /// Record a meter reading on today's daily checklist, creating it if needed.
    pub async fn record_reading(&self, entity_id: i64, reading: i64) {
        let now = self.clock.now();
        let checklist = match self
            .store
            .find_checklist_covering(entity_id, ChecklistType::Daily, now)
            .await
            .unwrap()
        {
            Some(checklist) => checklist,
            None => {
                let (from_date, to_date) = day_window(now);
                self.store
                    .create_checklist(
                        &NewChecklist {
                            entity_id,
                            checklist_type: ChecklistType::Daily,
                            from_date,
                            to_date,
                            created_at: now,
                        },
                        &[],
                    )
                    .await
                    .unwrap()
            }
        };
        self.store
            .record_checklist_reading(checklist.id, reading)
            .await
            .unwrap();
    }

    pub async fn definition(&self, id: i64) -> MaintenanceDefinition {
        self.store.get_definition(id).await.unwrap().unwrap()
    }

    pub async fn copies_of(&self, template_id: i64) -> Vec<MaintenanceDefinition> {
        self.store
            .list_definitions(upkeep_core::model::DefinitionKind::Copy, Some(template_id))
            .await
            .unwrap()
    }
}
