// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Editing operations on maintenance definitions and their tasks.
//!
//! Every operation returns the [`Effects`] it planned. Edits to an Origin or
//! its tasks plan a `propagate_origin` job so Templates catch up in the
//! background; the caller flushes effects after the edit committed.

use tracing::{info, warn};

use crate::context::MaintenanceContext;
use crate::effects::Effects;
use crate::error::{CoreError, Result};
use crate::model::{
    DefinitionFields, DefinitionKind, MaintenanceDefinition, Measurement, NewDefinition, TaskNode,
};
use crate::propagation::load_definition;
use crate::reminder::{maintenance_link, plan_origin_rules};
use crate::task_tree::{self, MAX_TASK_DEPTH, TaskPlan, TaskTree};

/// Fields for a new Origin.
#[derive(Debug, Clone)]
pub struct NewOrigin {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Recurrence unit.
    pub measurement: Measurement,
    /// Recurrence threshold.
    pub value: i64,
}

/// Partial update of an Origin. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct OriginUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
    /// New recurrence unit.
    pub measurement: Option<Measurement>,
    /// New recurrence threshold.
    pub value: Option<i64>,
}

fn validate_fields(name: &str, value: i64) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CoreError::validation("name", "must not be empty"));
    }
    if value < 0 {
        return Err(CoreError::validation("value", "must not be negative"));
    }
    Ok(())
}

fn validate_task_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CoreError::validation("name", "task name must not be empty"));
    }
    Ok(())
}

/// Create an Origin with no tasks.
pub async fn create_origin(
    ctx: &MaintenanceContext,
    origin: NewOrigin,
    actor_id: Option<i64>,
) -> Result<(MaintenanceDefinition, Effects)> {
    validate_fields(&origin.name, origin.value)?;

    let created = ctx
        .persistence
        .create_definition(
            &NewDefinition {
                kind: DefinitionKind::Origin,
                entity_id: None,
                origin_id: None,
                name: origin.name,
                description: origin.description,
                measurement: origin.measurement,
                value: origin.value,
                previous_reading: None,
                current_reading: None,
                from_date: None,
                to_date: None,
                created_at: ctx.clock.now(),
            },
            &TaskPlan::default(),
        )
        .await?;

    let mut effects = Effects::new();
    effects.history(created.id, actor_id, "created", None);
    info!(origin_id = created.id, name = %created.name, "Created origin");

    Ok((created, effects))
}

/// Update an Origin's structural fields and plan propagation to its Templates.
pub async fn update_origin(
    ctx: &MaintenanceContext,
    origin_id: i64,
    update: OriginUpdate,
    actor_id: Option<i64>,
) -> Result<(MaintenanceDefinition, Effects)> {
    let origin = load_definition(ctx, origin_id, DefinitionKind::Origin).await?;

    let current = DefinitionFields::from(&origin);
    let fields = DefinitionFields {
        name: update.name.unwrap_or_else(|| current.name.clone()),
        description: update
            .description
            .unwrap_or_else(|| current.description.clone()),
        measurement: update.measurement.unwrap_or(current.measurement),
        value: update.value.unwrap_or(current.value),
    };
    validate_fields(&fields.name, fields.value)?;

    let mut effects = Effects::new();
    if fields == current {
        return Ok((origin, effects));
    }

    ctx.persistence
        .update_definition(origin_id, Some(&fields), None)
        .await?;
    let updated = load_definition(ctx, origin_id, DefinitionKind::Origin).await?;

    effects.propagate(origin_id, true, false);
    effects.history(origin_id, actor_id, "updated", None);
    info!(origin_id, "Updated origin");

    Ok((updated, effects))
}

/// Bind an Origin to an entity by creating a Template for it.
///
/// The Template copies the Origin's structural fields, starts its meter
/// baseline at the entity's latest reading, gets a transactional clone of
/// the Origin's tasks and a derived copy of each Origin reminder rule.
pub async fn assign_origin(
    ctx: &MaintenanceContext,
    origin_id: i64,
    entity_id: i64,
    actor_id: Option<i64>,
) -> Result<(MaintenanceDefinition, Effects)> {
    let origin = load_definition(ctx, origin_id, DefinitionKind::Origin).await?;
    let entity = ctx
        .persistence
        .get_entity(entity_id)
        .await?
        .ok_or(CoreError::EntityNotFound { id: entity_id })?;

    let existing = ctx
        .persistence
        .list_definitions(DefinitionKind::Template, Some(origin.id))
        .await?;
    if existing.iter().any(|t| t.entity_id == Some(entity.id)) {
        return Err(CoreError::Conflict {
            operation: "assign_origin".to_string(),
            details: format!("origin {} is already assigned to entity {}", origin.id, entity.id),
        });
    }

    let reading = if origin.measurement.is_meter_based() {
        ctx.readings.latest_reading(entity.id).await?
    } else {
        None
    };

    let new_template = NewDefinition {
        kind: DefinitionKind::Template,
        entity_id: Some(entity.id),
        origin_id: Some(origin.id),
        name: origin.name.clone(),
        description: origin.description.clone(),
        measurement: origin.measurement,
        value: origin.value,
        previous_reading: reading,
        current_reading: reading,
        from_date: None,
        to_date: None,
        created_at: ctx.clock.now(),
    };
    let plan = task_tree::task_plan(ctx.persistence.as_ref(), origin.id).await?;
    let rules = plan_origin_rules(ctx, origin.id, &new_template).await?;
    let template = ctx
        .persistence
        .create_template(&new_template, &plan, &rules)
        .await?;

    let mut effects = Effects::new();
    match ctx
        .assignments
        .entity_assignment_ids(entity.id, actor_id)
        .await
    {
        Ok(user_ids) => {
            for user_id in user_ids {
                effects.notify(
                    user_id,
                    format!("Maintenance '{}' was assigned to {}", template.name, entity.name),
                    Some(maintenance_link(template.id)),
                );
            }
        }
        Err(e) => warn!(
            template_id = template.id,
            entity_id,
            error = %e,
            "Failed to load assignments, skipping assignment notifications"
        ),
    }
    effects.history(
        template.id,
        actor_id,
        "assigned",
        Some(format!("origin {} to entity {}", origin.id, entity.id)),
    );

    info!(
        origin_id,
        entity_id,
        template_id = template.id,
        tasks = plan.len(),
        reminder_rules = rules.len(),
        "Assigned origin to entity"
    );

    Ok((template, effects))
}

fn plan_task_edit(
    effects: &mut Effects,
    definition: &MaintenanceDefinition,
    actor_id: Option<i64>,
    action: &str,
    task_name: &str,
) {
    if definition.kind == DefinitionKind::Origin {
        effects.propagate(definition.id, false, true);
    }
    effects.history(definition.id, actor_id, action, Some(task_name.to_string()));
}

/// Add a task, optionally under a parent of the same definition.
pub async fn add_task(
    ctx: &MaintenanceContext,
    definition_id: i64,
    parent_task_id: Option<i64>,
    name: &str,
    actor_id: Option<i64>,
) -> Result<(TaskNode, Effects)> {
    validate_task_name(name)?;
    let definition = ctx
        .persistence
        .get_definition(definition_id)
        .await?
        .ok_or(CoreError::DefinitionNotFound { id: definition_id })?;

    if let Some(parent_id) = parent_task_id {
        let parent = ctx
            .persistence
            .get_task(parent_id)
            .await?
            .ok_or(CoreError::TaskNotFound { id: parent_id })?;
        if parent.definition_id != definition_id {
            return Err(CoreError::validation(
                "parent_task_id",
                format!("task {parent_id} belongs to another definition"),
            ));
        }

        let tree = TaskTree::from_tasks(ctx.persistence.list_tasks(definition_id).await?);
        match tree.depth(parent_id) {
            Some(depth) if depth < MAX_TASK_DEPTH => {}
            _ => {
                return Err(CoreError::TaskDepthExceeded {
                    parent_task_id: parent_id,
                    max_depth: MAX_TASK_DEPTH,
                });
            }
        }
    }

    let task = ctx
        .persistence
        .create_task(definition_id, parent_task_id, name.trim())
        .await?;

    let mut effects = Effects::new();
    plan_task_edit(&mut effects, &definition, actor_id, "task_added", &task.name);

    Ok((task, effects))
}

async fn task_with_definition(
    ctx: &MaintenanceContext,
    task_id: i64,
) -> Result<(TaskNode, MaintenanceDefinition)> {
    let task = ctx
        .persistence
        .get_task(task_id)
        .await?
        .ok_or(CoreError::TaskNotFound { id: task_id })?;
    let definition = ctx
        .persistence
        .get_definition(task.definition_id)
        .await?
        .ok_or(CoreError::DefinitionNotFound {
            id: task.definition_id,
        })?;
    Ok((task, definition))
}

/// Rename a task.
pub async fn rename_task(
    ctx: &MaintenanceContext,
    task_id: i64,
    name: &str,
    actor_id: Option<i64>,
) -> Result<Effects> {
    validate_task_name(name)?;
    let (_, definition) = task_with_definition(ctx, task_id).await?;

    ctx.persistence.rename_task(task_id, name.trim()).await?;

    let mut effects = Effects::new();
    plan_task_edit(&mut effects, &definition, actor_id, "task_renamed", name.trim());
    Ok(effects)
}

/// Delete a task together with its subtasks.
pub async fn delete_task(
    ctx: &MaintenanceContext,
    task_id: i64,
    actor_id: Option<i64>,
) -> Result<Effects> {
    let (task, definition) = task_with_definition(ctx, task_id).await?;

    ctx.persistence.delete_task(task_id).await?;

    let mut effects = Effects::new();
    plan_task_edit(&mut effects, &definition, actor_id, "task_deleted", &task.name);
    Ok(effects)
}

/// Mark a task and its whole subtree complete, or clear them.
///
/// Users assigned to the definition's entity, except the actor, are notified.
/// Returns how many tasks changed.
pub async fn toggle_task(
    ctx: &MaintenanceContext,
    task_id: i64,
    actor_id: i64,
    completed: bool,
) -> Result<(u64, Effects)> {
    let (task, definition) = task_with_definition(ctx, task_id).await?;

    let tree = TaskTree::from_tasks(ctx.persistence.list_tasks(definition.id).await?);
    let ids = tree.subtree_ids(task.id);
    let (completed_by, completed_at) = if completed {
        (Some(actor_id), Some(ctx.clock.now()))
    } else {
        (None, None)
    };
    let changed = ctx
        .persistence
        .set_task_completion(&ids, completed_by, completed_at)
        .await?;

    let state = if completed { "completed" } else { "reopened" };
    let mut effects = Effects::new();
    if let Some(entity_id) = definition.entity_id {
        for user_id in ctx
            .assignments
            .entity_assignment_ids(entity_id, Some(actor_id))
            .await?
        {
            effects.notify(
                user_id,
                format!("Task '{}' of '{}' was {}", task.name, definition.name, state),
                Some(maintenance_link(definition.id)),
            );
        }
    }
    effects.history(
        definition.id,
        Some(actor_id),
        format!("task_{state}"),
        Some(task.name.clone()),
    );

    info!(task_id, actor_id, completed, changed, "Toggled task");
    Ok((changed, effects))
}
