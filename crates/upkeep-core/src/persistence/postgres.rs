// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence.
//!
//! Operations are free functions over a `PgPool` so they can be used without
//! going through the trait object; [`PostgresPersistence`] delegates to them.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

use crate::error::CoreError;
use crate::model::{
    Checklist, ChecklistItem, ChecklistTemplate, ChecklistType, DefinitionFields, DefinitionKind,
    Entity, EntityStatus, HistoryRecord, MaintenanceDefinition, NewChecklist, NewDefinition,
    NewEntity, NotificationRecord, PlannedReminder, ReadingBaseline, ReminderRule,
    ReminderUpsert, TaskNode,
};
use crate::task_tree::TaskPlan;

use super::{JobQueue, NewHistory, NewNotification, Persistence, QueuedJob};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Entity Operations
// ============================================================================

/// Register an entity.
pub async fn create_entity(
    pool: &PgPool,
    entity: &NewEntity,
    created_at: DateTime<Utc>,
) -> Result<Entity, CoreError> {
    let record = sqlx::query_as::<_, Entity>(
        r#"
        INSERT INTO entities (kind, name, status, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, kind, name, status, created_at, deleted_at
        "#,
    )
    .bind(entity.kind.as_str())
    .bind(&entity.name)
    .bind(entity.status.as_str())
    .bind(created_at)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// Get an entity by ID.
pub async fn get_entity(pool: &PgPool, id: i64) -> Result<Option<Entity>, CoreError> {
    let record = sqlx::query_as::<_, Entity>(
        r#"
        SELECT id, kind, name, status, created_at, deleted_at
        FROM entities
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Entities that are not soft-deleted and are working or idle.
pub async fn list_active_entities(pool: &PgPool) -> Result<Vec<Entity>, CoreError> {
    let records = sqlx::query_as::<_, Entity>(
        r#"
        SELECT id, kind, name, status, created_at, deleted_at
        FROM entities
        WHERE deleted_at IS NULL AND status IN ('working', 'idle')
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Change an entity's operational status.
pub async fn update_entity_status(
    pool: &PgPool,
    id: i64,
    status: EntityStatus,
) -> Result<(), CoreError> {
    let result = sqlx::query("UPDATE entities SET status = $1 WHERE id = $2")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::EntityNotFound { id });
    }
    Ok(())
}

/// Assign a user to an entity. Re-assigning is a no-op.
pub async fn assign_user(pool: &PgPool, entity_id: i64, user_id: i64) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO entity_assignments (entity_id, user_id)
        VALUES ($1, $2)
        ON CONFLICT (entity_id, user_id) DO NOTHING
        "#,
    )
    .bind(entity_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Users assigned to an entity.
pub async fn entity_assignment_ids(pool: &PgPool, entity_id: i64) -> Result<Vec<i64>, CoreError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT user_id FROM entity_assignments WHERE entity_id = $1 ORDER BY user_id",
    )
    .bind(entity_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// ============================================================================
// Definition Operations
// ============================================================================

/// Get a maintenance definition by ID.
pub async fn get_definition(
    pool: &PgPool,
    id: i64,
) -> Result<Option<MaintenanceDefinition>, CoreError> {
    let record = sqlx::query_as::<_, MaintenanceDefinition>(
        r#"
        SELECT id, kind, entity_id, origin_id, name, description, measurement, value,
               previous_reading, current_reading, from_date, to_date, created_at
        FROM maintenance_definitions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Definitions of one kind, optionally restricted to one parent.
pub async fn list_definitions(
    pool: &PgPool,
    kind: DefinitionKind,
    origin_id: Option<i64>,
) -> Result<Vec<MaintenanceDefinition>, CoreError> {
    let records = sqlx::query_as::<_, MaintenanceDefinition>(
        r#"
        SELECT id, kind, entity_id, origin_id, name, description, measurement, value,
               previous_reading, current_reading, from_date, to_date, created_at
        FROM maintenance_definitions
        WHERE kind = $1 AND ($2::BIGINT IS NULL OR origin_id = $2)
        ORDER BY id
        "#,
    )
    .bind(kind.as_str())
    .bind(origin_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Templates of entities that are not soft-deleted and are working or idle.
pub async fn list_active_templates(pool: &PgPool) -> Result<Vec<MaintenanceDefinition>, CoreError> {
    let records = sqlx::query_as::<_, MaintenanceDefinition>(
        r#"
        SELECT d.id, d.kind, d.entity_id, d.origin_id, d.name, d.description, d.measurement,
               d.value, d.previous_reading, d.current_reading, d.from_date, d.to_date,
               d.created_at
        FROM maintenance_definitions d
        JOIN entities e ON e.id = d.entity_id
        WHERE d.kind = 'template'
          AND e.deleted_at IS NULL
          AND e.status IN ('working', 'idle')
        ORDER BY d.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Copies whose window contains `at`.
pub async fn list_copies_covering(
    pool: &PgPool,
    at: DateTime<Utc>,
) -> Result<Vec<MaintenanceDefinition>, CoreError> {
    let records = sqlx::query_as::<_, MaintenanceDefinition>(
        r#"
        SELECT id, kind, entity_id, origin_id, name, description, measurement, value,
               previous_reading, current_reading, from_date, to_date, created_at
        FROM maintenance_definitions
        WHERE kind = 'copy' AND from_date <= $1 AND to_date > $1
        ORDER BY id
        "#,
    )
    .bind(at)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

async fn insert_definition(
    conn: &mut PgConnection,
    def: &NewDefinition,
) -> Result<MaintenanceDefinition, sqlx::Error> {
    sqlx::query_as::<_, MaintenanceDefinition>(
        r#"
        INSERT INTO maintenance_definitions
            (kind, entity_id, origin_id, name, description, measurement, value,
             previous_reading, current_reading, from_date, to_date, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING id, kind, entity_id, origin_id, name, description, measurement, value,
                  previous_reading, current_reading, from_date, to_date, created_at
        "#,
    )
    .bind(def.kind.as_str())
    .bind(def.entity_id)
    .bind(def.origin_id)
    .bind(&def.name)
    .bind(&def.description)
    .bind(def.measurement.as_str())
    .bind(def.value)
    .bind(def.previous_reading)
    .bind(def.current_reading)
    .bind(def.from_date)
    .bind(def.to_date)
    .bind(def.created_at)
    .fetch_one(&mut *conn)
    .await
}

async fn insert_task_plan(
    conn: &mut PgConnection,
    definition_id: i64,
    plan: &TaskPlan,
) -> Result<Vec<i64>, sqlx::Error> {
    let mut created = Vec::with_capacity(plan.len());
    for task in &plan.tasks {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO maintenance_tasks (definition_id, parent_task_id, name)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(definition_id)
        .bind(TaskPlan::created_parent_id(task, &created))
        .bind(&task.name)
        .fetch_one(&mut *conn)
        .await?;
        created.push(id);
    }
    Ok(created)
}

async fn insert_reminders(
    conn: &mut PgConnection,
    definition_id: i64,
    reminders: &[PlannedReminder],
) -> Result<(), sqlx::Error> {
    for reminder in reminders {
        sqlx::query(
            r#"
            INSERT INTO reminder_rules (definition_id, measurement, value, previous_value, origin_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(definition_id)
        .bind(reminder.measurement.as_str())
        .bind(reminder.value)
        .bind(reminder.previous_value)
        .bind(reminder.origin_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Insert a Template with its task tree and reminder rules in one transaction.
pub async fn create_template(
    pool: &PgPool,
    template: &NewDefinition,
    tasks: &TaskPlan,
    reminders: &[PlannedReminder],
) -> Result<MaintenanceDefinition, CoreError> {
    let mut tx = pool.begin().await?;
    let record = insert_definition(&mut tx, template).await?;
    insert_task_plan(&mut tx, record.id, tasks).await?;
    insert_reminders(&mut tx, record.id, reminders).await?;
    tx.commit().await?;

    Ok(record)
}

/// Write a Template's meter baseline.
pub async fn set_reading_baseline(
    pool: &PgPool,
    baseline: &ReadingBaseline,
) -> Result<(), CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE maintenance_definitions
        SET previous_reading = $1, current_reading = $2
        WHERE id = $3
        "#,
    )
    .bind(baseline.previous_reading)
    .bind(baseline.current_reading)
    .bind(baseline.template_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::DefinitionNotFound {
            id: baseline.template_id,
        });
    }
    Ok(())
}

/// Insert a definition and its task tree in one transaction.
pub async fn create_definition(
    pool: &PgPool,
    definition: &NewDefinition,
    tasks: &TaskPlan,
) -> Result<MaintenanceDefinition, CoreError> {
    let mut tx = pool.begin().await?;
    let record = insert_definition(&mut tx, definition).await?;
    insert_task_plan(&mut tx, record.id, tasks).await?;
    tx.commit().await?;

    Ok(record)
}

/// Insert a Copy, clone its tasks and reset the Template baseline in one transaction.
pub async fn spawn_copy(
    pool: &PgPool,
    copy: &NewDefinition,
    tasks: &TaskPlan,
    baseline: Option<ReadingBaseline>,
) -> Result<MaintenanceDefinition, CoreError> {
    let mut tx = pool.begin().await?;
    let record = insert_definition(&mut tx, copy).await?;
    insert_task_plan(&mut tx, record.id, tasks).await?;

    if let Some(baseline) = baseline {
        sqlx::query(
            r#"
            UPDATE maintenance_definitions
            SET previous_reading = $1, current_reading = $2
            WHERE id = $3
            "#,
        )
        .bind(baseline.previous_reading)
        .bind(baseline.current_reading)
        .bind(baseline.template_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(record)
}

/// Overwrite structural fields and/or replace the task tree in one transaction.
pub async fn update_definition(
    pool: &PgPool,
    id: i64,
    fields: Option<&DefinitionFields>,
    tasks: Option<&TaskPlan>,
) -> Result<(), CoreError> {
    let mut tx = pool.begin().await?;

    // Lock the row so concurrent propagations to one Template serialize.
    let exists: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM maintenance_definitions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    if exists.is_none() {
        return Err(CoreError::DefinitionNotFound { id });
    }

    if let Some(fields) = fields {
        sqlx::query(
            r#"
            UPDATE maintenance_definitions
            SET name = $1, description = $2, measurement = $3, value = $4
            WHERE id = $5
            "#,
        )
        .bind(&fields.name)
        .bind(&fields.description)
        .bind(fields.measurement.as_str())
        .bind(fields.value)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(plan) = tasks {
        sqlx::query("DELETE FROM maintenance_tasks WHERE definition_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_task_plan(&mut tx, id, plan).await?;
    }

    tx.commit().await?;
    Ok(())
}

// ============================================================================
// Task Operations
// ============================================================================

/// Every task of a definition.
pub async fn list_tasks(pool: &PgPool, definition_id: i64) -> Result<Vec<TaskNode>, CoreError> {
    let records = sqlx::query_as::<_, TaskNode>(
        r#"
        SELECT id, definition_id, parent_task_id, name, completed_by, completed_at
        FROM maintenance_tasks
        WHERE definition_id = $1
        ORDER BY id
        "#,
    )
    .bind(definition_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Get a task by ID.
pub async fn get_task(pool: &PgPool, id: i64) -> Result<Option<TaskNode>, CoreError> {
    let record = sqlx::query_as::<_, TaskNode>(
        r#"
        SELECT id, definition_id, parent_task_id, name, completed_by, completed_at
        FROM maintenance_tasks
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Insert a single task.
pub async fn create_task(
    pool: &PgPool,
    definition_id: i64,
    parent_task_id: Option<i64>,
    name: &str,
) -> Result<TaskNode, CoreError> {
    let record = sqlx::query_as::<_, TaskNode>(
        r#"
        INSERT INTO maintenance_tasks (definition_id, parent_task_id, name)
        VALUES ($1, $2, $3)
        RETURNING id, definition_id, parent_task_id, name, completed_by, completed_at
        "#,
    )
    .bind(definition_id)
    .bind(parent_task_id)
    .bind(name)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// Insert a planned tree in one transaction.
pub async fn insert_tasks(
    pool: &PgPool,
    definition_id: i64,
    plan: &TaskPlan,
) -> Result<Vec<i64>, CoreError> {
    let mut tx = pool.begin().await?;
    let ids = insert_task_plan(&mut tx, definition_id, plan).await?;
    tx.commit().await?;

    Ok(ids)
}

/// Rename a task.
pub async fn rename_task(pool: &PgPool, id: i64, name: &str) -> Result<(), CoreError> {
    let result = sqlx::query("UPDATE maintenance_tasks SET name = $1 WHERE id = $2")
        .bind(name)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::TaskNotFound { id });
    }
    Ok(())
}

/// Delete a task and, through the foreign key, its subtasks.
pub async fn delete_task(pool: &PgPool, id: i64) -> Result<(), CoreError> {
    let result = sqlx::query("DELETE FROM maintenance_tasks WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::TaskNotFound { id });
    }
    Ok(())
}

/// Set or clear completion on a set of tasks.
pub async fn set_task_completion(
    pool: &PgPool,
    ids: &[i64],
    completed_by: Option<i64>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE maintenance_tasks
        SET completed_by = $1, completed_at = $2
        WHERE id = ANY($3)
        "#,
    )
    .bind(completed_by)
    .bind(completed_at)
    .bind(ids)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// ============================================================================
// Reminder Operations
// ============================================================================

/// Reminder rules of a definition.
pub async fn list_reminders(
    pool: &PgPool,
    definition_id: i64,
) -> Result<Vec<ReminderRule>, CoreError> {
    let records = sqlx::query_as::<_, ReminderRule>(
        r#"
        SELECT id, definition_id, measurement, value, previous_value, origin_id, last_fired_on
        FROM reminder_rules
        WHERE definition_id = $1
        ORDER BY id
        "#,
    )
    .bind(definition_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Insert or replace the rule for `(definition_id, measurement)`.
pub async fn upsert_reminder(
    pool: &PgPool,
    reminder: &ReminderUpsert,
) -> Result<ReminderRule, CoreError> {
    let record = sqlx::query_as::<_, ReminderRule>(
        r#"
        INSERT INTO reminder_rules (definition_id, measurement, value, previous_value, origin_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (definition_id, measurement) DO UPDATE SET
            value = EXCLUDED.value,
            previous_value = EXCLUDED.previous_value,
            origin_id = COALESCE(EXCLUDED.origin_id, reminder_rules.origin_id),
            last_fired_on = NULL
        RETURNING id, definition_id, measurement, value, previous_value, origin_id, last_fired_on
        "#,
    )
    .bind(reminder.definition_id)
    .bind(reminder.measurement.as_str())
    .bind(reminder.value)
    .bind(reminder.previous_value)
    .bind(reminder.origin_id)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// Advance a rule's reference point unless it already fired on `fired_on`.
pub async fn advance_reminder(
    pool: &PgPool,
    id: i64,
    previous_value: i64,
    fired_on: NaiveDate,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE reminder_rules
        SET previous_value = $1, last_fired_on = $2
        WHERE id = $3 AND last_fired_on IS DISTINCT FROM $2
        "#,
    )
    .bind(previous_value)
    .bind(fired_on)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Checklist Operations
// ============================================================================

/// Create a checklist template with its items.
pub async fn create_checklist_template(
    pool: &PgPool,
    name: &str,
    checklist_type: ChecklistType,
    items: &[String],
) -> Result<ChecklistTemplate, CoreError> {
    let mut tx = pool.begin().await?;
    let template = sqlx::query_as::<_, ChecklistTemplate>(
        "INSERT INTO checklist_templates (name, type) VALUES ($1, $2) RETURNING id, name, type",
    )
    .bind(name)
    .bind(checklist_type.as_str())
    .fetch_one(&mut *tx)
    .await?;

    for item in items {
        sqlx::query("INSERT INTO checklist_template_items (template_id, name) VALUES ($1, $2)")
            .bind(template.id)
            .bind(item)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(template)
}

/// Assign (or reassign) the template an entity uses for a checklist type.
pub async fn assign_checklist_template(
    pool: &PgPool,
    entity_id: i64,
    checklist_type: ChecklistType,
    template_id: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO entity_checklist_templates (entity_id, type, template_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (entity_id, type) DO UPDATE SET template_id = EXCLUDED.template_id
        "#,
    )
    .bind(entity_id)
    .bind(checklist_type.as_str())
    .bind(template_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Template assigned to an entity for a checklist type.
pub async fn get_assigned_checklist_template(
    pool: &PgPool,
    entity_id: i64,
    checklist_type: ChecklistType,
) -> Result<Option<ChecklistTemplate>, CoreError> {
    let record = sqlx::query_as::<_, ChecklistTemplate>(
        r#"
        SELECT t.id, t.name, t.type
        FROM entity_checklist_templates e
        JOIN checklist_templates t ON t.id = e.template_id
        WHERE e.entity_id = $1 AND e.type = $2
        "#,
    )
    .bind(entity_id)
    .bind(checklist_type.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Item names of a checklist template.
pub async fn list_checklist_template_items(
    pool: &PgPool,
    template_id: i64,
) -> Result<Vec<String>, CoreError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM checklist_template_items WHERE template_id = $1 ORDER BY id",
    )
    .bind(template_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Checklist of a type whose window contains `at`.
pub async fn find_checklist_covering(
    pool: &PgPool,
    entity_id: i64,
    checklist_type: ChecklistType,
    at: DateTime<Utc>,
) -> Result<Option<Checklist>, CoreError> {
    let record = sqlx::query_as::<_, Checklist>(
        r#"
        SELECT id, entity_id, type, from_date, to_date, current_meter_reading, created_at
        FROM checklists
        WHERE entity_id = $1 AND type = $2 AND from_date <= $3 AND to_date > $3
        ORDER BY from_date DESC
        LIMIT 1
        "#,
    )
    .bind(entity_id)
    .bind(checklist_type.as_str())
    .bind(at)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Insert a checklist and its items in one transaction.
pub async fn create_checklist(
    pool: &PgPool,
    checklist: &NewChecklist,
    items: &[String],
) -> Result<Checklist, CoreError> {
    let mut tx = pool.begin().await?;
    let record = sqlx::query_as::<_, Checklist>(
        r#"
        INSERT INTO checklists (entity_id, type, from_date, to_date, created_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, entity_id, type, from_date, to_date, current_meter_reading, created_at
        "#,
    )
    .bind(checklist.entity_id)
    .bind(checklist.checklist_type.as_str())
    .bind(checklist.from_date)
    .bind(checklist.to_date)
    .bind(checklist.created_at)
    .fetch_one(&mut *tx)
    .await?;

    if !items.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO checklist_items (checklist_id, name)
            SELECT $1, item FROM UNNEST($2::TEXT[]) WITH ORDINALITY AS t(item, n)
            ORDER BY n
            "#,
        )
        .bind(record.id)
        .bind(items)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(record)
}

/// Get a checklist by ID.
pub async fn get_checklist(pool: &PgPool, id: i64) -> Result<Option<Checklist>, CoreError> {
    let record = sqlx::query_as::<_, Checklist>(
        r#"
        SELECT id, entity_id, type, from_date, to_date, current_meter_reading, created_at
        FROM checklists
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Checklists of an entity, newest window first.
pub async fn list_checklists(pool: &PgPool, entity_id: i64) -> Result<Vec<Checklist>, CoreError> {
    let records = sqlx::query_as::<_, Checklist>(
        r#"
        SELECT id, entity_id, type, from_date, to_date, current_meter_reading, created_at
        FROM checklists
        WHERE entity_id = $1
        ORDER BY from_date DESC, id DESC
        "#,
    )
    .bind(entity_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Items of a checklist.
pub async fn list_checklist_items(
    pool: &PgPool,
    checklist_id: i64,
) -> Result<Vec<ChecklistItem>, CoreError> {
    let records = sqlx::query_as::<_, ChecklistItem>(
        r#"
        SELECT id, checklist_id, name, completed_by, completed_at
        FROM checklist_items
        WHERE checklist_id = $1
        ORDER BY id
        "#,
    )
    .bind(checklist_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Store an operator meter reading on a checklist.
pub async fn record_checklist_reading(
    pool: &PgPool,
    checklist_id: i64,
    reading: i64,
) -> Result<(), CoreError> {
    let result = sqlx::query("UPDATE checklists SET current_meter_reading = $1 WHERE id = $2")
        .bind(reading)
        .bind(checklist_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::ChecklistNotFound { id: checklist_id });
    }
    Ok(())
}

/// Reading of the entity's most recent checklist that has one.
pub async fn latest_meter_reading(pool: &PgPool, entity_id: i64) -> Result<Option<i64>, CoreError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT current_meter_reading
        FROM checklists
        WHERE entity_id = $1 AND current_meter_reading IS NOT NULL
        ORDER BY from_date DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(reading,)| reading))
}

// ============================================================================
// Notification & History Operations
// ============================================================================

/// Insert a notification unless its dedup key exists.
pub async fn insert_notification(
    pool: &PgPool,
    notification: &NewNotification<'_>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO notifications (dedup_key, user_id, body, link, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (dedup_key) DO NOTHING
        "#,
    )
    .bind(notification.dedup_key)
    .bind(notification.user_id)
    .bind(notification.body)
    .bind(notification.link)
    .bind(notification.created_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Notifications of a user.
pub async fn list_notifications(
    pool: &PgPool,
    user_id: i64,
) -> Result<Vec<NotificationRecord>, CoreError> {
    let records = sqlx::query_as::<_, NotificationRecord>(
        r#"
        SELECT id, dedup_key, user_id, body, link, created_at
        FROM notifications
        WHERE user_id = $1
        ORDER BY id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Insert a history entry unless its dedup key exists.
pub async fn insert_history(pool: &PgPool, entry: &NewHistory<'_>) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO maintenance_history
            (dedup_key, definition_id, actor_id, action, details, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (dedup_key) DO NOTHING
        "#,
    )
    .bind(entry.dedup_key)
    .bind(entry.definition_id)
    .bind(entry.actor_id)
    .bind(entry.action)
    .bind(entry.details)
    .bind(entry.created_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// History entries of a definition.
pub async fn list_history(
    pool: &PgPool,
    definition_id: i64,
) -> Result<Vec<HistoryRecord>, CoreError> {
    let records = sqlx::query_as::<_, HistoryRecord>(
        r#"
        SELECT id, dedup_key, definition_id, actor_id, action, details, created_at
        FROM maintenance_history
        WHERE definition_id = $1
        ORDER BY id
        "#,
    )
    .bind(definition_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

// ============================================================================
// Job Queue Operations
// ============================================================================

/// Enqueue a job.
pub async fn enqueue_job(
    pool: &PgPool,
    job_name: &str,
    payload: &str,
    run_at: DateTime<Utc>,
) -> Result<i64, CoreError> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO job_queue (job_name, payload, status, run_at, created_at)
        VALUES ($1, $2, 'pending', $3, $3)
        RETURNING id
        "#,
    )
    .bind(job_name)
    .bind(payload)
    .bind(run_at)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Claim deliverable jobs, skipping rows locked by other workers.
pub async fn claim_jobs(
    pool: &PgPool,
    now: DateTime<Utc>,
    visible_until: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<QueuedJob>, CoreError> {
    let mut jobs = sqlx::query_as::<_, QueuedJob>(
        r#"
        UPDATE job_queue
        SET status = 'running', attempts = attempts + 1, run_at = $1
        WHERE id IN (
            SELECT id FROM job_queue
            WHERE status IN ('pending', 'running') AND run_at <= $2
            ORDER BY run_at, id
            LIMIT $3
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, job_name, payload, status, attempts, last_error, run_at, created_at
        "#,
    )
    .bind(visible_until)
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    jobs.sort_by_key(|j| j.id);
    Ok(jobs)
}

/// Mark a job done.
pub async fn complete_job(pool: &PgPool, id: i64) -> Result<(), CoreError> {
    sqlx::query("UPDATE job_queue SET status = 'done', last_error = NULL WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Reschedule a failed job, or mark it dead when `retry_at` is `None`.
pub async fn fail_job(
    pool: &PgPool,
    id: i64,
    error: &str,
    retry_at: Option<DateTime<Utc>>,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        UPDATE job_queue
        SET status = CASE WHEN $3::TIMESTAMPTZ IS NULL THEN 'dead' ELSE 'pending' END,
            run_at = COALESCE($3, run_at),
            last_error = $2
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(error)
    .bind(retry_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Number of jobs in a status.
pub async fn count_jobs(pool: &PgPool, status: &str) -> Result<i64, CoreError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_queue WHERE status = $1")
        .bind(status)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// Take or renew a named lease.
pub async fn try_acquire_lease(
    pool: &PgPool,
    name: &str,
    holder: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO job_leases (name, holder, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE SET
            holder = EXCLUDED.holder,
            expires_at = EXCLUDED.expires_at
        WHERE job_leases.expires_at <= $4 OR job_leases.holder = EXCLUDED.holder
        "#,
    )
    .bind(name)
    .bind(holder)
    .bind(expires_at)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Release a lease held by `holder`.
pub async fn release_lease(pool: &PgPool, name: &str, holder: &str) -> Result<(), CoreError> {
    sqlx::query("DELETE FROM job_leases WHERE name = $1 AND holder = $2")
        .bind(name)
        .bind(holder)
        .execute(pool)
        .await?;

    Ok(())
}

// ============================================================================
// Trait Implementations
// ============================================================================

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn create_entity(
        &self,
        entity: &NewEntity,
        created_at: DateTime<Utc>,
    ) -> Result<Entity, CoreError> {
        create_entity(&self.pool, entity, created_at).await
    }

    async fn get_entity(&self, id: i64) -> Result<Option<Entity>, CoreError> {
        get_entity(&self.pool, id).await
    }

    async fn list_active_entities(&self) -> Result<Vec<Entity>, CoreError> {
        list_active_entities(&self.pool).await
    }

    async fn update_entity_status(&self, id: i64, status: EntityStatus) -> Result<(), CoreError> {
        update_entity_status(&self.pool, id, status).await
    }

    async fn assign_user(&self, entity_id: i64, user_id: i64) -> Result<(), CoreError> {
        assign_user(&self.pool, entity_id, user_id).await
    }

    async fn entity_assignment_ids(&self, entity_id: i64) -> Result<Vec<i64>, CoreError> {
        entity_assignment_ids(&self.pool, entity_id).await
    }

    async fn get_definition(&self, id: i64) -> Result<Option<MaintenanceDefinition>, CoreError> {
        get_definition(&self.pool, id).await
    }

    async fn list_definitions(
        &self,
        kind: DefinitionKind,
        origin_id: Option<i64>,
    ) -> Result<Vec<MaintenanceDefinition>, CoreError> {
        list_definitions(&self.pool, kind, origin_id).await
    }

    async fn list_active_templates(&self) -> Result<Vec<MaintenanceDefinition>, CoreError> {
        list_active_templates(&self.pool).await
    }

    async fn list_copies_covering(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceDefinition>, CoreError> {
        list_copies_covering(&self.pool, at).await
    }

    async fn create_definition(
        &self,
        definition: &NewDefinition,
        tasks: &TaskPlan,
    ) -> Result<MaintenanceDefinition, CoreError> {
        create_definition(&self.pool, definition, tasks).await
    }

    async fn create_template(
        &self,
        template: &NewDefinition,
        tasks: &TaskPlan,
        reminders: &[PlannedReminder],
    ) -> Result<MaintenanceDefinition, CoreError> {
        create_template(&self.pool, template, tasks, reminders).await
    }

    async fn spawn_copy(
        &self,
        copy: &NewDefinition,
        tasks: &TaskPlan,
        baseline: Option<ReadingBaseline>,
    ) -> Result<MaintenanceDefinition, CoreError> {
        spawn_copy(&self.pool, copy, tasks, baseline).await
    }

    async fn set_reading_baseline(&self, baseline: &ReadingBaseline) -> Result<(), CoreError> {
        set_reading_baseline(&self.pool, baseline).await
    }

    async fn update_definition(
        &self,
        id: i64,
        fields: Option<&DefinitionFields>,
        tasks: Option<&TaskPlan>,
    ) -> Result<(), CoreError> {
        update_definition(&self.pool, id, fields, tasks).await
    }

    async fn list_tasks(&self, definition_id: i64) -> Result<Vec<TaskNode>, CoreError> {
        list_tasks(&self.pool, definition_id).await
    }

    async fn get_task(&self, id: i64) -> Result<Option<TaskNode>, CoreError> {
        get_task(&self.pool, id).await
    }

    async fn create_task(
        &self,
        definition_id: i64,
        parent_task_id: Option<i64>,
        name: &str,
    ) -> Result<TaskNode, CoreError> {
        create_task(&self.pool, definition_id, parent_task_id, name).await
    }

    async fn insert_tasks(
        &self,
        definition_id: i64,
        plan: &TaskPlan,
    ) -> Result<Vec<i64>, CoreError> {
        insert_tasks(&self.pool, definition_id, plan).await
    }

    async fn rename_task(&self, id: i64, name: &str) -> Result<(), CoreError> {
        rename_task(&self.pool, id, name).await
    }

    async fn delete_task(&self, id: i64) -> Result<(), CoreError> {
        delete_task(&self.pool, id).await
    }

    async fn set_task_completion(
        &self,
        ids: &[i64],
        completed_by: Option<i64>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64, CoreError> {
        set_task_completion(&self.pool, ids, completed_by, completed_at).await
    }

    async fn list_reminders(&self, definition_id: i64) -> Result<Vec<ReminderRule>, CoreError> {
        list_reminders(&self.pool, definition_id).await
    }

    async fn upsert_reminder(&self, reminder: &ReminderUpsert) -> Result<ReminderRule, CoreError> {
        upsert_reminder(&self.pool, reminder).await
    }

    async fn advance_reminder(
        &self,
        id: i64,
        previous_value: i64,
        fired_on: NaiveDate,
    ) -> Result<bool, CoreError> {
        advance_reminder(&self.pool, id, previous_value, fired_on).await
    }

    async fn create_checklist_template(
        &self,
        name: &str,
        checklist_type: ChecklistType,
        items: &[String],
    ) -> Result<ChecklistTemplate, CoreError> {
        create_checklist_template(&self.pool, name, checklist_type, items).await
    }

    async fn assign_checklist_template(
        &self,
        entity_id: i64,
        checklist_type: ChecklistType,
        template_id: i64,
    ) -> Result<(), CoreError> {
        assign_checklist_template(&self.pool, entity_id, checklist_type, template_id).await
    }

    async fn get_assigned_checklist_template(
        &self,
        entity_id: i64,
        checklist_type: ChecklistType,
    ) -> Result<Option<ChecklistTemplate>, CoreError> {
        get_assigned_checklist_template(&self.pool, entity_id, checklist_type).await
    }

    async fn list_checklist_template_items(
        &self,
        template_id: i64,
    ) -> Result<Vec<String>, CoreError> {
        list_checklist_template_items(&self.pool, template_id).await
    }

    async fn find_checklist_covering(
        &self,
        entity_id: i64,
        checklist_type: ChecklistType,
        at: DateTime<Utc>,
    ) -> Result<Option<Checklist>, CoreError> {
        find_checklist_covering(&self.pool, entity_id, checklist_type, at).await
    }

    async fn create_checklist(
        &self,
        checklist: &NewChecklist,
        items: &[String],
    ) -> Result<Checklist, CoreError> {
        create_checklist(&self.pool, checklist, items).await
    }

    async fn get_checklist(&self, id: i64) -> Result<Option<Checklist>, CoreError> {
        get_checklist(&self.pool, id).await
    }

    async fn list_checklists(&self, entity_id: i64) -> Result<Vec<Checklist>, CoreError> {
        list_checklists(&self.pool, entity_id).await
    }

    async fn list_checklist_items(
        &self,
        checklist_id: i64,
    ) -> Result<Vec<ChecklistItem>, CoreError> {
        list_checklist_items(&self.pool, checklist_id).await
    }

    async fn record_checklist_reading(
        &self,
        checklist_id: i64,
        reading: i64,
    ) -> Result<(), CoreError> {
        record_checklist_reading(&self.pool, checklist_id, reading).await
    }

    async fn latest_meter_reading(&self, entity_id: i64) -> Result<Option<i64>, CoreError> {
        latest_meter_reading(&self.pool, entity_id).await
    }

    async fn insert_notification(
        &self,
        notification: &NewNotification<'_>,
    ) -> Result<bool, CoreError> {
        insert_notification(&self.pool, notification).await
    }

    async fn list_notifications(
        &self,
        user_id: i64,
    ) -> Result<Vec<NotificationRecord>, CoreError> {
        list_notifications(&self.pool, user_id).await
    }

    async fn insert_history(&self, entry: &NewHistory<'_>) -> Result<bool, CoreError> {
        insert_history(&self.pool, entry).await
    }

    async fn list_history(&self, definition_id: i64) -> Result<Vec<HistoryRecord>, CoreError> {
        list_history(&self.pool, definition_id).await
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}

#[async_trait::async_trait]
impl JobQueue for PostgresPersistence {
    async fn enqueue_job(
        &self,
        job_name: &str,
        payload: &str,
        run_at: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        enqueue_job(&self.pool, job_name, payload, run_at).await
    }

    async fn claim_jobs(
        &self,
        now: DateTime<Utc>,
        visible_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueuedJob>, CoreError> {
        claim_jobs(&self.pool, now, visible_until, limit).await
    }

    async fn complete_job(&self, id: i64) -> Result<(), CoreError> {
        complete_job(&self.pool, id).await
    }

    async fn fail_job(
        &self,
        id: i64,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        fail_job(&self.pool, id, error, retry_at).await
    }

    async fn count_jobs(&self, status: &str) -> Result<i64, CoreError> {
        count_jobs(&self.pool, status).await
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        try_acquire_lease(&self.pool, name, holder, now, expires_at).await
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), CoreError> {
        release_lease(&self.pool, name, holder).await
    }
}
