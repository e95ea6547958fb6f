// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Checklist generation and operator readings.
//!
//! Every active entity gets one daily and one weekly checklist per window,
//! with items copied from the template assigned for that cadence. There is
//! no measurement gating. The meter readings operators record on checklists
//! are what meter-based maintenance is measured against.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::checklist_window;
use crate::context::MaintenanceContext;
use crate::error::{CoreError, Result};
use crate::generation::{GenerationOptions, GenerationReport};
use crate::model::{Checklist, ChecklistType, Entity, NewChecklist};

/// Create the missing daily and weekly checklists for every active entity.
pub async fn generate_checklists(
    ctx: &MaintenanceContext,
    options: &GenerationOptions,
) -> Result<GenerationReport> {
    let now = ctx.clock.now();
    let entities = ctx.persistence.list_active_entities().await?;

    info!(entities = entities.len(), "Starting checklist generation");

    let mut report = GenerationReport::default();

    'chunks: for chunk in entities.chunks(options.chunk_size()) {
        for entity in chunk {
            for checklist_type in ChecklistType::ALL {
                if options.is_cancelled() {
                    warn!("Checklist generation cancelled");
                    report.cancelled = true;
                    break 'chunks;
                }
                report.examined += 1;

                match generate_for(ctx, entity, checklist_type, now).await {
                    Ok(Some(checklist)) => {
                        debug!(
                            entity_id = entity.id,
                            checklist_id = checklist.id,
                            checklist_type = %checklist_type,
                            "Generated checklist"
                        );
                        report.created += 1;
                    }
                    Ok(None) => report.already_generated += 1,
                    Err(e) if e.is_conflict() => report.already_generated += 1,
                    Err(e) => {
                        error!(
                            entity_id = entity.id,
                            checklist_type = %checklist_type,
                            error = %e,
                            "Failed to generate checklist"
                        );
                        report.failed += 1;
                    }
                }
            }
        }
        tokio::task::yield_now().await;
    }

    info!(
        examined = report.examined,
        created = report.created,
        already_generated = report.already_generated,
        failed = report.failed,
        cancelled = report.cancelled,
        "Checklist generation finished"
    );

    Ok(report)
}

async fn generate_for(
    ctx: &MaintenanceContext,
    entity: &Entity,
    checklist_type: ChecklistType,
    now: DateTime<Utc>,
) -> Result<Option<Checklist>> {
    let persistence = ctx.persistence.as_ref();

    if persistence
        .find_checklist_covering(entity.id, checklist_type, now)
        .await?
        .is_some()
    {
        return Ok(None);
    }

    let items = match persistence
        .get_assigned_checklist_template(entity.id, checklist_type)
        .await?
    {
        Some(template) => persistence.list_checklist_template_items(template.id).await?,
        None => Vec::new(),
    };

    let (from_date, to_date) = checklist_window(checklist_type, now);
    let checklist = persistence
        .create_checklist(
            &NewChecklist {
                entity_id: entity.id,
                checklist_type,
                from_date,
                to_date,
                created_at: now,
            },
            &items,
        )
        .await?;

    Ok(Some(checklist))
}

/// Store a meter reading an operator entered on a checklist.
pub async fn record_checklist_reading(
    ctx: &MaintenanceContext,
    checklist_id: i64,
    reading: i64,
) -> Result<()> {
    if reading < 0 {
        return Err(CoreError::validation(
            "reading",
            "meter reading must not be negative",
        ));
    }
    ctx.persistence
        .record_checklist_reading(checklist_id, reading)
        .await?;
    debug!(checklist_id, reading, "Recorded checklist meter reading");
    Ok(())
}
