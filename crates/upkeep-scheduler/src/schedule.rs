// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cron schedules evaluated in UTC.

use std::fmt;

use chrono::{DateTime, Utc};
use croner::Cron;

use crate::error::{Error, Result};

/// A parsed cron expression.
pub struct Schedule {
    expression: String,
    cron: Cron,
}

impl Schedule {
    /// Parse a five-field cron expression, e.g. `0 5 * * *`.
    pub fn parse(expression: &str) -> Result<Self> {
        let cron = Cron::new(expression)
            .parse()
            .map_err(|e| Error::Schedule(format!("invalid cron '{expression}': {e}")))?;
        Ok(Self {
            expression: expression.to_string(),
            cron,
        })
    }

    /// The source expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.cron
            .find_next_occurrence(&after, false)
            .map_err(|e| Error::Schedule(format!("no next run for '{}': {e}", self.expression)))
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schedule").field(&self.expression).finish()
    }
}
