// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dependencies shared by every engine operation.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::collaborators::{AssignmentDirectory, ChecklistReadings, ReadingSource, StoreAssignments};
use crate::error::Result;
use crate::model::MaintenanceDefinition;
use crate::persistence::Persistence;

/// Store, clock and collaborators used by engine operations.
///
/// Cheap to clone. Nothing here caches definition state; every operation
/// reads the store afresh.
#[derive(Clone)]
pub struct MaintenanceContext {
    /// Entity & template store.
    pub persistence: Arc<dyn Persistence>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Meter readings.
    pub readings: Arc<dyn ReadingSource>,
    /// Entity assignments.
    pub assignments: Arc<dyn AssignmentDirectory>,
}

impl MaintenanceContext {
    /// Context over `persistence` with the wall clock and store-backed
    /// readings and assignments.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            readings: Arc::new(ChecklistReadings::new(persistence.clone())),
            assignments: Arc::new(StoreAssignments::new(persistence.clone())),
            clock: Arc::new(SystemClock),
            persistence,
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the reading source.
    pub fn with_readings(mut self, readings: Arc<dyn ReadingSource>) -> Self {
        self.readings = readings;
        self
    }

    /// Replace the assignment directory.
    pub fn with_assignments(mut self, assignments: Arc<dyn AssignmentDirectory>) -> Self {
        self.assignments = assignments;
        self
    }

    /// Latest reading for a definition's entity, falling back to the
    /// definition's stored `current_reading`.
    pub async fn resolve_reading(&self, definition: &MaintenanceDefinition) -> Result<Option<i64>> {
        let latest = match definition.entity_id {
            Some(entity_id) => self.readings.latest_reading(entity_id).await?,
            None => None,
        };
        Ok(latest.or(definition.current_reading))
    }
}
