// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daily generation of dated maintenance Copies.
//!
//! For every Template of an active entity without a Copy covering today,
//! the measurement evaluator decides whether the recurrence threshold was
//! reached; if so a Copy for today's window is spawned with a fresh clone of
//! the Template's tasks. A meter Template seen without a baseline gets the
//! current reading recorded as one and is not due that day.
//!
//! Running twice on the same day creates nothing the second time: the
//! covering-window read skips Templates already handled, and the unique
//! `(origin_id, from_date)` index turns a racing duplicate into a conflict
//! that is counted as already generated.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::day_window;
use crate::context::MaintenanceContext;
use crate::error::Result;
use crate::measurement::{self, Progress};
use crate::model::{DefinitionKind, MaintenanceDefinition, NewDefinition, ReadingBaseline};
use crate::task_tree;

/// Default records per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Knobs for a generation run.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Records processed between cooperative yields.
    pub batch_size: usize,
    /// Set to stop the run between records.
    pub cancel: Arc<AtomicBool>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl GenerationOptions {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

/// Counters for one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Records looked at.
    pub examined: usize,
    /// Records created.
    pub created: usize,
    /// Records skipped because today's window was already covered.
    pub already_generated: usize,
    /// Records whose threshold was not reached.
    pub not_due: usize,
    /// Records that failed; logged and skipped.
    pub failed: usize,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

enum CopyOutcome {
    Created(MaintenanceDefinition),
    NotDue,
}

/// Create today's Copy for every due Template.
///
/// Per-Template failures are logged and counted, never abort the run.
pub async fn generate_periodic_maintenances(
    ctx: &MaintenanceContext,
    options: &GenerationOptions,
) -> Result<GenerationReport> {
    let now = ctx.clock.now();
    let templates = ctx.persistence.list_active_templates().await?;
    let covered: HashSet<i64> = ctx
        .persistence
        .list_copies_covering(now)
        .await?
        .into_iter()
        .filter_map(|copy| copy.origin_id)
        .collect();

    info!(
        templates = templates.len(),
        covered = covered.len(),
        "Starting periodic maintenance generation"
    );

    let mut report = GenerationReport::default();

    'chunks: for chunk in templates.chunks(options.chunk_size()) {
        for template in chunk {
            if options.is_cancelled() {
                warn!("Maintenance generation cancelled");
                report.cancelled = true;
                break 'chunks;
            }
            report.examined += 1;

            if covered.contains(&template.id) {
                report.already_generated += 1;
                continue;
            }

            match generate_copy(ctx, template, now).await {
                Ok(CopyOutcome::Created(copy)) => {
                    info!(
                        template_id = template.id,
                        copy_id = copy.id,
                        entity_id = ?template.entity_id,
                        measurement = %template.measurement,
                        "Generated maintenance copy"
                    );
                    report.created += 1;
                }
                Ok(CopyOutcome::NotDue) => report.not_due += 1,
                Err(e) if e.is_conflict() => {
                    debug!(template_id = template.id, "Copy already generated concurrently");
                    report.already_generated += 1;
                }
                Err(e) => {
                    error!(
                        template_id = template.id,
                        error = %e,
                        "Failed to generate maintenance copy"
                    );
                    report.failed += 1;
                }
            }
        }
        tokio::task::yield_now().await;
    }

    info!(
        examined = report.examined,
        created = report.created,
        already_generated = report.already_generated,
        not_due = report.not_due,
        failed = report.failed,
        cancelled = report.cancelled,
        "Periodic maintenance generation finished"
    );

    Ok(report)
}

async fn generate_copy(
    ctx: &MaintenanceContext,
    template: &MaintenanceDefinition,
    now: DateTime<Utc>,
) -> Result<CopyOutcome> {
    let kind = template.measurement;

    let (due, baseline) = if kind.is_meter_based() {
        let Some(current) = ctx.resolve_reading(template).await? else {
            debug!(template_id = template.id, "No meter reading yet");
            return Ok(CopyOutcome::NotDue);
        };
        let baseline = ReadingBaseline {
            template_id: template.id,
            previous_reading: current,
            current_reading: current,
        };
        let Some(previous) = template.previous_reading else {
            ctx.persistence.set_reading_baseline(&baseline).await?;
            info!(
                template_id = template.id,
                reading = current,
                "Recorded first meter baseline"
            );
            return Ok(CopyOutcome::NotDue);
        };
        let due = measurement::evaluate(kind, template.value, Progress::Meter { previous, current });
        (due, Some(baseline))
    } else {
        let progress = Progress::Calendar {
            anchor: template.created_at,
            now,
        };
        (measurement::evaluate(kind, template.value, progress), None)
    };

    if !due {
        return Ok(CopyOutcome::NotDue);
    }

    let (from, to) = day_window(now);
    let plan = task_tree::task_plan(ctx.persistence.as_ref(), template.id).await?;
    let copy = NewDefinition {
        kind: DefinitionKind::Copy,
        entity_id: template.entity_id,
        origin_id: Some(template.id),
        name: template.name.clone(),
        description: template.description.clone(),
        measurement: kind,
        value: template.value,
        previous_reading: template.previous_reading,
        current_reading: baseline.map(|b| b.current_reading),
        from_date: Some(from),
        to_date: Some(to),
        created_at: now,
    };

    let created = ctx.persistence.spawn_copy(&copy, &plan, baseline).await?;
    Ok(CopyOutcome::Created(created))
}
