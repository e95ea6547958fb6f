// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Origin → Template propagation.
//!
//! Edits to an Origin are re-applied to every Template derived from it.
//! Structural fields (name, description, measurement, value) are
//! overwritten; reading state stays with each Template because it belongs to
//! that Template's entity. Copies already generated are never touched.

use tracing::{error, info};

use crate::context::MaintenanceContext;
use crate::error::{CoreError, Result};
use crate::model::{DefinitionFields, DefinitionKind, MaintenanceDefinition};
use crate::task_tree;

/// Outcome of one propagation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Templates derived from the Origin.
    pub templates: usize,
    /// Templates updated.
    pub updated: usize,
    /// Templates whose update failed.
    pub failed: usize,
}

/// Load a definition and check its tier.
pub(crate) async fn load_definition(
    ctx: &MaintenanceContext,
    id: i64,
    expected: DefinitionKind,
) -> Result<MaintenanceDefinition> {
    let definition = ctx
        .persistence
        .get_definition(id)
        .await?
        .ok_or(CoreError::DefinitionNotFound { id })?;

    if definition.kind != expected {
        return Err(CoreError::InvalidDefinitionKind {
            id,
            expected,
            actual: definition.kind,
        });
    }
    Ok(definition)
}

/// Re-apply an Origin's current state to every Template derived from it.
///
/// Each Template is updated in its own transaction. A failing Template is
/// logged and counted; the rest still receive the change.
pub async fn propagate_origin_change(
    ctx: &MaintenanceContext,
    origin_id: i64,
    scalar_fields_changed: bool,
    tasks_changed: bool,
) -> Result<PropagationReport> {
    let origin = load_definition(ctx, origin_id, DefinitionKind::Origin).await?;

    let templates = ctx
        .persistence
        .list_definitions(DefinitionKind::Template, Some(origin.id))
        .await?;
    let mut report = PropagationReport {
        templates: templates.len(),
        ..Default::default()
    };

    if !scalar_fields_changed && !tasks_changed {
        return Ok(report);
    }

    let fields = scalar_fields_changed.then(|| DefinitionFields::from(&origin));
    let plan = if tasks_changed {
        Some(task_tree::task_plan(ctx.persistence.as_ref(), origin.id).await?)
    } else {
        None
    };

    for template in &templates {
        match ctx
            .persistence
            .update_definition(template.id, fields.as_ref(), plan.as_ref())
            .await
        {
            Ok(()) => report.updated += 1,
            Err(e) => {
                error!(
                    origin_id,
                    template_id = template.id,
                    error = %e,
                    "Failed to propagate origin change to template"
                );
                report.failed += 1;
            }
        }
    }

    info!(
        origin_id,
        templates = report.templates,
        updated = report.updated,
        failed = report.failed,
        scalar_fields_changed,
        tasks_changed,
        "Propagated origin change"
    );

    Ok(report)
}
