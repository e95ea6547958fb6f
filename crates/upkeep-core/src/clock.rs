// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Time source and date-window helpers.
//!
//! All engine code asks a [`Clock`] for "now" so tests can pin the date.
//! Windows are half-open `[start, end)` in UTC.

use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use crate::model::ChecklistType;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date in UTC.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Start of the UTC day containing `date`.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// The calendar day containing `at`.
pub fn day_window(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = start_of_day(at.date_naive());
    (start, start + Duration::days(1))
}

/// The ISO week (Monday start) containing `at`.
pub fn week_window(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = at.date_naive();
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    let start = start_of_day(monday);
    (start, start + Duration::days(7))
}

/// The generation window for a checklist cadence.
pub fn checklist_window(
    checklist_type: ChecklistType,
    at: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    match checklist_type {
        ChecklistType::Daily => day_window(at),
        ChecklistType::Weekly => week_window(at),
    }
}

/// Absolute number of calendar days between the dates of `anchor` and `now`.
pub fn elapsed_days(anchor: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - anchor.date_naive()).num_days().abs()
}
