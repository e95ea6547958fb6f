// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Measurement evaluator.
//!
//! Decides whether a recurrence threshold has been reached. The same
//! functions gate both Copy generation and reminder firing.
//!
//! | Measurement | Quantity | Due when |
//! |-------------|----------|----------|
//! | `Hour`, `Kilometer` | meter reading | `|current - previous| >= value` |
//! | `Day` | elapsed days | `elapsed % value == 0` |
//! | `Week` | elapsed days | `elapsed % (value * 7) == 0` |
//! | `Month` | elapsed days | `elapsed % (value * 30) == 0` |
//! | `Unset` | - | never |
//!
//! A month is always 30 days. A non-positive `value` is never due.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::clock::elapsed_days;
use crate::model::Measurement;

/// Days per unit for calendar measurements; 1 for meter measurements.
pub fn unit_days(kind: Measurement) -> Option<i64> {
    match kind {
        Measurement::Hour | Measurement::Kilometer | Measurement::Day => Some(1),
        Measurement::Week => Some(7),
        Measurement::Month => Some(30),
        Measurement::Unset => None,
    }
}

/// Threshold expressed in base quantity (meter units or days).
///
/// Returns `None` when nothing can ever be due: unset measurement or
/// `value <= 0`.
pub fn threshold_span(kind: Measurement, value: i64) -> Option<i64> {
    if value <= 0 {
        if kind != Measurement::Unset {
            warn!(measurement = %kind, value, "Non-positive recurrence value, treating as never due");
        }
        return None;
    }
    unit_days(kind).and_then(|unit| value.checked_mul(unit))
}

/// Quantity-distance check.
///
/// For meter kinds `previous`/`current` are readings; for calendar kinds they
/// are elapsed-day counts and the threshold is scaled to days.
pub fn is_due(kind: Measurement, value: i64, previous: i64, current: i64) -> bool {
    match threshold_span(kind, value) {
        Some(span) => current.abs_diff(previous) >= span.unsigned_abs(),
        None => false,
    }
}

/// Calendar recurrence check anchored at `anchor`.
///
/// Meter kinds are never due by elapsed days.
pub fn is_due_by_elapsed_days(
    kind: Measurement,
    value: i64,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    if !kind.is_calendar_based() {
        return false;
    }
    match threshold_span(kind, value) {
        Some(span) => elapsed_days(anchor, now) % span == 0,
        None => false,
    }
}

/// What a due-check is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Meter readings.
    Meter {
        /// Reference reading.
        previous: i64,
        /// Latest reading.
        current: i64,
    },
    /// Calendar anchor.
    Calendar {
        /// Anchor date.
        anchor: DateTime<Utc>,
        /// Evaluation instant.
        now: DateTime<Utc>,
    },
}

/// Evaluate a recurrence condition.
///
/// A meter measurement paired with calendar progress (or the reverse) is
/// never due.
pub fn evaluate(kind: Measurement, value: i64, progress: Progress) -> bool {
    match progress {
        Progress::Meter { previous, current } if kind.is_meter_based() => {
            is_due(kind, value, previous, current)
        }
        Progress::Calendar { anchor, now } => is_due_by_elapsed_days(kind, value, anchor, now),
        Progress::Meter { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_day_recurrence() {
        let d = anchor();
        assert!(is_due_by_elapsed_days(Measurement::Day, 7, d, d));
        assert!(is_due_by_elapsed_days(Measurement::Day, 7, d, d + Duration::days(7)));
        assert!(!is_due_by_elapsed_days(Measurement::Day, 7, d, d + Duration::days(3)));
    }

    #[test]
    fn test_week_recurrence() {
        let d = anchor();
        for elapsed in [0, 14, 28] {
            assert!(
                is_due_by_elapsed_days(Measurement::Week, 2, d, d + Duration::days(elapsed)),
                "expected due at {elapsed} days"
            );
        }
        assert!(!is_due_by_elapsed_days(Measurement::Week, 2, d, d + Duration::days(7)));
    }

    #[test]
    fn test_month_is_thirty_days() {
        let d = anchor();
        assert!(is_due_by_elapsed_days(Measurement::Month, 1, d, d + Duration::days(30)));
        assert!(!is_due_by_elapsed_days(Measurement::Month, 1, d, d + Duration::days(31)));
        assert!(is_due_by_elapsed_days(Measurement::Month, 3, d, d + Duration::days(90)));
    }

    #[test]
    fn test_elapsed_days_before_anchor() {
        let d = anchor();
        assert!(is_due_by_elapsed_days(Measurement::Day, 5, d, d - Duration::days(10)));
    }

    #[test]
    fn test_meter_due() {
        assert!(is_due(Measurement::Hour, 50, 100, 160));
        assert!(!is_due(Measurement::Hour, 50, 100, 140));
        assert!(is_due(Measurement::Kilometer, 50, 100, 150));
        // Meter rolled back (replacement unit) still counts the distance.
        assert!(is_due(Measurement::Kilometer, 50, 200, 120));
    }

    #[test]
    fn test_calendar_quantities_scale_to_days() {
        assert!(is_due(Measurement::Week, 2, 0, 14));
        assert!(!is_due(Measurement::Week, 2, 0, 13));
        assert!(is_due(Measurement::Month, 1, 10, 40));
    }

    #[test]
    fn test_non_positive_value_never_due() {
        let d = anchor();
        assert!(!is_due_by_elapsed_days(Measurement::Day, 0, d, d));
        assert!(!is_due_by_elapsed_days(Measurement::Week, -1, d, d));
        assert!(!is_due(Measurement::Hour, 0, 0, 1_000));
        assert!(!is_due(Measurement::Kilometer, -5, 0, 1_000));
    }

    #[test]
    fn test_unset_never_due() {
        let d = anchor();
        assert!(!is_due(Measurement::Unset, 10, 0, 100));
        assert!(!is_due_by_elapsed_days(Measurement::Unset, 1, d, d));
    }

    #[test]
    fn test_meter_kind_not_due_by_calendar() {
        let d = anchor();
        assert!(!is_due_by_elapsed_days(Measurement::Hour, 1, d, d));
        assert!(!evaluate(Measurement::Hour, 1, Progress::Calendar { anchor: d, now: d }));
    }

    #[test]
    fn test_evaluate_dispatch() {
        let d = anchor();
        assert!(evaluate(
            Measurement::Hour,
            50,
            Progress::Meter {
                previous: 100,
                current: 155
            }
        ));
        assert!(evaluate(
            Measurement::Day,
            7,
            Progress::Calendar {
                anchor: d,
                now: d + Duration::days(21)
            }
        ));
        assert!(!evaluate(
            Measurement::Day,
            7,
            Progress::Meter {
                previous: 0,
                current: 700
            }
        ));
    }
}
