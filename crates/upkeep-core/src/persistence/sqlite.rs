// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::CoreError;
use crate::model::{
    Checklist, ChecklistItem, ChecklistTemplate, ChecklistType, DefinitionFields, DefinitionKind,
    Entity, EntityStatus, HistoryRecord, MaintenanceDefinition, NewChecklist, NewDefinition,
    NewEntity, NotificationRecord, PlannedReminder, ReadingBaseline, ReminderRule,
    ReminderUpsert, TaskNode,
};
use crate::task_tree::TaskPlan;

use super::{JobQueue, NewHistory, NewNotification, Persistence, QueuedJob};

const ENTITY_COLUMNS: &str = "id, kind, name, status, created_at, deleted_at";
const DEFINITION_COLUMNS: &str = "id, kind, entity_id, origin_id, name, description, measurement, \
     value, previous_reading, current_reading, from_date, to_date, created_at";
const TASK_COLUMNS: &str = "id, definition_id, parent_task_id, name, completed_by, completed_at";
const REMINDER_COLUMNS: &str =
    "id, definition_id, measurement, value, previous_value, origin_id, last_fired_on";
const CHECKLIST_COLUMNS: &str =
    "id, entity_id, type, from_date, to_date, current_meter_reading, created_at";
const JOB_COLUMNS: &str = "id, job_name, payload, status, attempts, last_error, run_at, created_at";

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        crate::migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a migrated in-memory database.
    ///
    /// Uses a single connection, since every SQLite memory connection is a
    /// separate database.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        crate::migrations::run_sqlite(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn insert_definition(
    conn: &mut SqliteConnection,
    def: &NewDefinition,
) -> Result<MaintenanceDefinition, sqlx::Error> {
    sqlx::query_as::<_, MaintenanceDefinition>(&format!(
        r#"
        INSERT INTO maintenance_definitions
            (kind, entity_id, origin_id, name, description, measurement, value,
             previous_reading, current_reading, from_date, to_date, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING {DEFINITION_COLUMNS}
        "#
    ))
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
    conn: &mut SqliteConnection,
    definition_id: i64,
    plan: &TaskPlan,
) -> Result<Vec<i64>, sqlx::Error> {
    let mut created = Vec::with_capacity(plan.len());
    for task in &plan.tasks {
        let parent_id = TaskPlan::created_parent_id(task, &created);
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO maintenance_tasks (definition_id, parent_task_id, name)
            VALUES (?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(definition_id)
        .bind(parent_id)
        .bind(&task.name)
        .fetch_one(&mut *conn)
        .await?;
        created.push(id);
    }
    Ok(created)
}

async fn insert_reminders(
    conn: &mut SqliteConnection,
    definition_id: i64,
    reminders: &[PlannedReminder],
) -> Result<(), sqlx::Error> {
    for reminder in reminders {
        sqlx::query(
            r#"
            INSERT INTO reminder_rules (definition_id, measurement, value, previous_value, origin_id)
            VALUES (?, ?, ?, ?, ?)
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

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn create_entity(
        &self,
        entity: &NewEntity,
        created_at: DateTime<Utc>,
    ) -> Result<Entity, CoreError> {
        let record = sqlx::query_as::<_, Entity>(&format!(
            r#"
            INSERT INTO entities (kind, name, status, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING {ENTITY_COLUMNS}
            "#
        ))
        .bind(entity.kind.as_str())
        .bind(&entity.name)
        .bind(entity.status.as_str())
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_entity(&self, id: i64) -> Result<Option<Entity>, CoreError> {
        let record = sqlx::query_as::<_, Entity>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_active_entities(&self) -> Result<Vec<Entity>, CoreError> {
        let records = sqlx::query_as::<_, Entity>(&format!(
            r#"
            SELECT {ENTITY_COLUMNS} FROM entities
            WHERE deleted_at IS NULL AND status IN ('working', 'idle')
            ORDER BY id
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn update_entity_status(&self, id: i64, status: EntityStatus) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE entities SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::EntityNotFound { id });
        }
        Ok(())
    }

    async fn assign_user(&self, entity_id: i64, user_id: i64) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO entity_assignments (entity_id, user_id)
            VALUES (?, ?)
            ON CONFLICT (entity_id, user_id) DO NOTHING
            "#,
        )
        .bind(entity_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn entity_assignment_ids(&self, entity_id: i64) -> Result<Vec<i64>, CoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM entity_assignments WHERE entity_id = ? ORDER BY user_id",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get_definition(&self, id: i64) -> Result<Option<MaintenanceDefinition>, CoreError> {
        let record = sqlx::query_as::<_, MaintenanceDefinition>(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM maintenance_definitions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_definitions(
        &self,
        kind: DefinitionKind,
        origin_id: Option<i64>,
    ) -> Result<Vec<MaintenanceDefinition>, CoreError> {
        let records = sqlx::query_as::<_, MaintenanceDefinition>(&format!(
            r#"
            SELECT {DEFINITION_COLUMNS} FROM maintenance_definitions
            WHERE kind = ? AND (? IS NULL OR origin_id = ?)
            ORDER BY id
            "#
        ))
        .bind(kind.as_str())
        .bind(origin_id)
        .bind(origin_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_active_templates(&self) -> Result<Vec<MaintenanceDefinition>, CoreError> {
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
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_copies_covering(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceDefinition>, CoreError> {
        let records = sqlx::query_as::<_, MaintenanceDefinition>(&format!(
            r#"
            SELECT {DEFINITION_COLUMNS} FROM maintenance_definitions
            WHERE kind = 'copy' AND from_date <= ? AND to_date > ?
            ORDER BY id
            "#
        ))
        .bind(at)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn create_definition(
        &self,
        definition: &NewDefinition,
        tasks: &TaskPlan,
    ) -> Result<MaintenanceDefinition, CoreError> {
        let mut tx = self.pool.begin().await?;
        let record = insert_definition(&mut tx, definition).await?;
        insert_task_plan(&mut tx, record.id, tasks).await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn create_template(
        &self,
        template: &NewDefinition,
        tasks: &TaskPlan,
        reminders: &[PlannedReminder],
    ) -> Result<MaintenanceDefinition, CoreError> {
        let mut tx = self.pool.begin().await?;
        let record = insert_definition(&mut tx, template).await?;
        insert_task_plan(&mut tx, record.id, tasks).await?;
        insert_reminders(&mut tx, record.id, reminders).await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn spawn_copy(
        &self,
        copy: &NewDefinition,
        tasks: &TaskPlan,
        baseline: Option<ReadingBaseline>,
    ) -> Result<MaintenanceDefinition, CoreError> {
        let mut tx = self.pool.begin().await?;
        let record = insert_definition(&mut tx, copy).await?;
        insert_task_plan(&mut tx, record.id, tasks).await?;

        if let Some(baseline) = baseline {
            sqlx::query(
                r#"
                UPDATE maintenance_definitions
                SET previous_reading = ?, current_reading = ?
                WHERE id = ?
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

    async fn set_reading_baseline(&self, baseline: &ReadingBaseline) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE maintenance_definitions
            SET previous_reading = ?, current_reading = ?
            WHERE id = ?
            "#,
        )
        .bind(baseline.previous_reading)
        .bind(baseline.current_reading)
        .bind(baseline.template_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::DefinitionNotFound {
                id: baseline.template_id,
            });
        }
        Ok(())
    }

    async fn update_definition(
        &self,
        id: i64,
        fields: Option<&DefinitionFields>,
        tasks: Option<&TaskPlan>,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM maintenance_definitions WHERE id = ?")
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
                SET name = ?, description = ?, measurement = ?, value = ?
                WHERE id = ?
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
            sqlx::query("DELETE FROM maintenance_tasks WHERE definition_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            insert_task_plan(&mut tx, id, plan).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_tasks(&self, definition_id: i64) -> Result<Vec<TaskNode>, CoreError> {
        let records = sqlx::query_as::<_, TaskNode>(&format!(
            "SELECT {TASK_COLUMNS} FROM maintenance_tasks WHERE definition_id = ? ORDER BY id"
        ))
        .bind(definition_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn get_task(&self, id: i64) -> Result<Option<TaskNode>, CoreError> {
        let record = sqlx::query_as::<_, TaskNode>(&format!(
            "SELECT {TASK_COLUMNS} FROM maintenance_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn create_task(
        &self,
        definition_id: i64,
        parent_task_id: Option<i64>,
        name: &str,
    ) -> Result<TaskNode, CoreError> {
        let record = sqlx::query_as::<_, TaskNode>(&format!(
            r#"
            INSERT INTO maintenance_tasks (definition_id, parent_task_id, name)
            VALUES (?, ?, ?)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(definition_id)
        .bind(parent_task_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_tasks(
        &self,
        definition_id: i64,
        plan: &TaskPlan,
    ) -> Result<Vec<i64>, CoreError> {
        let mut tx = self.pool.begin().await?;
        let ids = insert_task_plan(&mut tx, definition_id, plan).await?;
        tx.commit().await?;

        Ok(ids)
    }

    async fn rename_task(&self, id: i64, name: &str) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE maintenance_tasks SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::TaskNotFound { id });
        }
        Ok(())
    }

    async fn delete_task(&self, id: i64) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM maintenance_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::TaskNotFound { id });
        }
        Ok(())
    }

    async fn set_task_completion(
        &self,
        ids: &[i64],
        completed_by: Option<i64>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64, CoreError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0u64;
        for id in ids {
            let result = sqlx::query(
                "UPDATE maintenance_tasks SET completed_by = ?, completed_at = ? WHERE id = ?",
            )
            .bind(completed_by)
            .bind(completed_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }
        tx.commit().await?;

        Ok(updated)
    }

    async fn list_reminders(&self, definition_id: i64) -> Result<Vec<ReminderRule>, CoreError> {
        let records = sqlx::query_as::<_, ReminderRule>(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminder_rules WHERE definition_id = ? ORDER BY id"
        ))
        .bind(definition_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn upsert_reminder(&self, reminder: &ReminderUpsert) -> Result<ReminderRule, CoreError> {
        let record = sqlx::query_as::<_, ReminderRule>(&format!(
            r#"
            INSERT INTO reminder_rules (definition_id, measurement, value, previous_value, origin_id)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (definition_id, measurement) DO UPDATE SET
                value = excluded.value,
                previous_value = excluded.previous_value,
                origin_id = COALESCE(excluded.origin_id, reminder_rules.origin_id),
                last_fired_on = NULL
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(reminder.definition_id)
        .bind(reminder.measurement.as_str())
        .bind(reminder.value)
        .bind(reminder.previous_value)
        .bind(reminder.origin_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn advance_reminder(
        &self,
        id: i64,
        previous_value: i64,
        fired_on: NaiveDate,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE reminder_rules
            SET previous_value = ?, last_fired_on = ?
            WHERE id = ? AND (last_fired_on IS NULL OR last_fired_on <> ?)
            "#,
        )
        .bind(previous_value)
        .bind(fired_on)
        .bind(id)
        .bind(fired_on)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_checklist_template(
        &self,
        name: &str,
        checklist_type: ChecklistType,
        items: &[String],
    ) -> Result<ChecklistTemplate, CoreError> {
        let mut tx = self.pool.begin().await?;
        let template = sqlx::query_as::<_, ChecklistTemplate>(
            "INSERT INTO checklist_templates (name, type) VALUES (?, ?) RETURNING id, name, type",
        )
        .bind(name)
        .bind(checklist_type.as_str())
        .fetch_one(&mut *tx)
        .await?;

        for item in items {
            sqlx::query("INSERT INTO checklist_template_items (template_id, name) VALUES (?, ?)")
                .bind(template.id)
                .bind(item)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(template)
    }

    async fn assign_checklist_template(
        &self,
        entity_id: i64,
        checklist_type: ChecklistType,
        template_id: i64,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO entity_checklist_templates (entity_id, type, template_id)
            VALUES (?, ?, ?)
            ON CONFLICT (entity_id, type) DO UPDATE SET template_id = excluded.template_id
            "#,
        )
        .bind(entity_id)
        .bind(checklist_type.as_str())
        .bind(template_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_assigned_checklist_template(
        &self,
        entity_id: i64,
        checklist_type: ChecklistType,
    ) -> Result<Option<ChecklistTemplate>, CoreError> {
        let record = sqlx::query_as::<_, ChecklistTemplate>(
            r#"
            SELECT t.id, t.name, t.type
            FROM entity_checklist_templates e
            JOIN checklist_templates t ON t.id = e.template_id
            WHERE e.entity_id = ? AND e.type = ?
            "#,
        )
        .bind(entity_id)
        .bind(checklist_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_checklist_template_items(
        &self,
        template_id: i64,
    ) -> Result<Vec<String>, CoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM checklist_template_items WHERE template_id = ? ORDER BY id",
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn find_checklist_covering(
        &self,
        entity_id: i64,
        checklist_type: ChecklistType,
        at: DateTime<Utc>,
    ) -> Result<Option<Checklist>, CoreError> {
        let record = sqlx::query_as::<_, Checklist>(&format!(
            r#"
            SELECT {CHECKLIST_COLUMNS} FROM checklists
            WHERE entity_id = ? AND type = ? AND from_date <= ? AND to_date > ?
            ORDER BY from_date DESC
            LIMIT 1
            "#
        ))
        .bind(entity_id)
        .bind(checklist_type.as_str())
        .bind(at)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn create_checklist(
        &self,
        checklist: &NewChecklist,
        items: &[String],
    ) -> Result<Checklist, CoreError> {
        let mut tx = self.pool.begin().await?;
        let record = sqlx::query_as::<_, Checklist>(&format!(
            r#"
            INSERT INTO checklists (entity_id, type, from_date, to_date, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING {CHECKLIST_COLUMNS}
            "#
        ))
        .bind(checklist.entity_id)
        .bind(checklist.checklist_type.as_str())
        .bind(checklist.from_date)
        .bind(checklist.to_date)
        .bind(checklist.created_at)
        .fetch_one(&mut *tx)
        .await?;

        for item in items {
            sqlx::query("INSERT INTO checklist_items (checklist_id, name) VALUES (?, ?)")
                .bind(record.id)
                .bind(item)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(record)
    }

    async fn get_checklist(&self, id: i64) -> Result<Option<Checklist>, CoreError> {
        let record = sqlx::query_as::<_, Checklist>(&format!(
            "SELECT {CHECKLIST_COLUMNS} FROM checklists WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_checklists(&self, entity_id: i64) -> Result<Vec<Checklist>, CoreError> {
        let records = sqlx::query_as::<_, Checklist>(&format!(
            r#"
            SELECT {CHECKLIST_COLUMNS} FROM checklists
            WHERE entity_id = ?
            ORDER BY from_date DESC, id DESC
            "#
        ))
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_checklist_items(
        &self,
        checklist_id: i64,
    ) -> Result<Vec<ChecklistItem>, CoreError> {
        let records = sqlx::query_as::<_, ChecklistItem>(
            r#"
            SELECT id, checklist_id, name, completed_by, completed_at
            FROM checklist_items WHERE checklist_id = ? ORDER BY id
            "#,
        )
        .bind(checklist_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn record_checklist_reading(
        &self,
        checklist_id: i64,
        reading: i64,
    ) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE checklists SET current_meter_reading = ? WHERE id = ?")
            .bind(reading)
            .bind(checklist_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ChecklistNotFound { id: checklist_id });
        }
        Ok(())
    }

    async fn latest_meter_reading(&self, entity_id: i64) -> Result<Option<i64>, CoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT current_meter_reading FROM checklists
            WHERE entity_id = ? AND current_meter_reading IS NOT NULL
            ORDER BY from_date DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(reading,)| reading))
    }

    async fn insert_notification(
        &self,
        notification: &NewNotification<'_>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (dedup_key, user_id, body, link, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(notification.dedup_key)
        .bind(notification.user_id)
        .bind(notification.body)
        .bind(notification.link)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_notifications(
        &self,
        user_id: i64,
    ) -> Result<Vec<NotificationRecord>, CoreError> {
        let records = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT id, dedup_key, user_id, body, link, created_at
            FROM notifications WHERE user_id = ? ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_history(&self, entry: &NewHistory<'_>) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO maintenance_history
                (dedup_key, definition_id, actor_id, action, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(entry.dedup_key)
        .bind(entry.definition_id)
        .bind(entry.actor_id)
        .bind(entry.action)
        .bind(entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_history(&self, definition_id: i64) -> Result<Vec<HistoryRecord>, CoreError> {
        let records = sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, dedup_key, definition_id, actor_id, action, details, created_at
            FROM maintenance_history WHERE definition_id = ? ORDER BY id
            "#,
        )
        .bind(definition_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}

#[async_trait::async_trait]
impl JobQueue for SqlitePersistence {
    async fn enqueue_job(
        &self,
        job_name: &str,
        payload: &str,
        run_at: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO job_queue (job_name, payload, status, run_at, created_at)
            VALUES (?, ?, 'pending', ?, ?)
            RETURNING id
            "#,
        )
        .bind(job_name)
        .bind(payload)
        .bind(run_at)
        .bind(run_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim_jobs(
        &self,
        now: DateTime<Utc>,
        visible_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueuedJob>, CoreError> {
        let mut jobs = sqlx::query_as::<_, QueuedJob>(&format!(
            r#"
            UPDATE job_queue
            SET status = 'running', attempts = attempts + 1, run_at = ?
            WHERE id IN (
                SELECT id FROM job_queue
                WHERE status IN ('pending', 'running') AND run_at <= ?
                ORDER BY run_at, id
                LIMIT ?
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(visible_until)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn complete_job(&self, id: i64) -> Result<(), CoreError> {
        sqlx::query("UPDATE job_queue SET status = 'done', last_error = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fail_job(
        &self,
        id: i64,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        match retry_at {
            Some(retry_at) => {
                sqlx::query(
                    "UPDATE job_queue SET status = 'pending', last_error = ?, run_at = ? WHERE id = ?",
                )
                .bind(error)
                .bind(retry_at)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("UPDATE job_queue SET status = 'dead', last_error = ? WHERE id = ?")
                    .bind(error)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    async fn count_jobs(&self, status: &str) -> Result<i64, CoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_queue WHERE status = ?")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_leases (name, holder, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE job_leases.expires_at <= ? OR job_leases.holder = excluded.holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM job_leases WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKind, Measurement};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    async fn persistence() -> SqlitePersistence {
        SqlitePersistence::in_memory()
            .await
            .expect("Failed to create in-memory SQLite persistence")
    }

    async fn entity(p: &SqlitePersistence, status: EntityStatus) -> Entity {
        p.create_entity(
            &NewEntity {
                kind: EntityKind::Machine,
                name: "Crane".to_string(),
                status,
            },
            now(),
        )
        .await
        .unwrap()
    }

    fn origin(name: &str) -> NewDefinition {
        NewDefinition {
            kind: DefinitionKind::Origin,
            entity_id: None,
            origin_id: None,
            name: name.to_string(),
            description: None,
            measurement: Measurement::Hour,
            value: 50,
            previous_reading: None,
            current_reading: None,
            from_date: None,
            to_date: None,
            created_at: now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_entity() {
        let p = persistence().await;
        let e = entity(&p, EntityStatus::Working).await;

        let fetched = p.get_entity(e.id).await.unwrap().unwrap();
        assert_eq!(fetched, e);
        assert_eq!(fetched.created_at, now());
        assert!(p.get_entity(e.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_entities_filters_status() {
        let p = persistence().await;
        let working = entity(&p, EntityStatus::Working).await;
        let idle = entity(&p, EntityStatus::Idle).await;
        entity(&p, EntityStatus::Breakdown).await;

        let active: Vec<i64> = p
            .list_active_entities()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(active, vec![working.id, idle.id]);

        p.update_entity_status(idle.id, EntityStatus::Breakdown)
            .await
            .unwrap();
        assert_eq!(p.list_active_entities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_status_missing_entity() {
        let p = persistence().await;
        let err = p
            .update_entity_status(404, EntityStatus::Idle)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ENTITY_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_assignments_are_deduplicated() {
        let p = persistence().await;
        let e = entity(&p, EntityStatus::Working).await;
        p.assign_user(e.id, 7).await.unwrap();
        p.assign_user(e.id, 3).await.unwrap();
        p.assign_user(e.id, 7).await.unwrap();

        assert_eq!(p.entity_assignment_ids(e.id).await.unwrap(), vec![3, 7]);
    }

    #[tokio::test]
    async fn test_create_definition_with_tasks() {
        let p = persistence().await;
        let mut plan = TaskPlan::default();
        plan.tasks.push(crate::task_tree::PlannedTask {
            name: "Root".to_string(),
            parent: None,
        });
        plan.tasks.push(crate::task_tree::PlannedTask {
            name: "Child".to_string(),
            parent: Some(0),
        });

        let def = p.create_definition(&origin("Service"), &plan).await.unwrap();
        assert_eq!(def.kind, DefinitionKind::Origin);
        assert_eq!(def.measurement, Measurement::Hour);

        let tasks = p.list_tasks(def.id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].parent_task_id, None);
        assert_eq!(tasks[1].parent_task_id, Some(tasks[0].id));
    }

    #[tokio::test]
    async fn test_update_definition_replaces_tasks_atomically() {
        let p = persistence().await;
        let def = p
            .create_definition(&origin("Service"), &TaskPlan::default())
            .await
            .unwrap();
        p.create_task(def.id, None, "Old").await.unwrap();

        let mut plan = TaskPlan::default();
        plan.tasks.push(crate::task_tree::PlannedTask {
            name: "New".to_string(),
            parent: None,
        });
        let fields = DefinitionFields {
            name: "Renamed".to_string(),
            description: Some("desc".to_string()),
            measurement: Measurement::Day,
            value: 7,
        };
        p.update_definition(def.id, Some(&fields), Some(&plan))
            .await
            .unwrap();

        let updated = p.get_definition(def.id).await.unwrap().unwrap();
        assert_eq!(DefinitionFields::from(&updated), fields);
        let names: Vec<String> = p
            .list_tasks(def.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["New".to_string()]);

        let err = p.update_definition(9999, Some(&fields), None).await.unwrap_err();
        assert_eq!(err.error_code(), "DEFINITION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_copy_unique_per_window() {
        let p = persistence().await;
        let template = p
            .create_definition(&origin("Template"), &TaskPlan::default())
            .await
            .unwrap();
        let mut copy = origin("Copy");
        copy.kind = DefinitionKind::Copy;
        copy.origin_id = Some(template.id);
        copy.from_date = Some(now());
        copy.to_date = Some(now() + Duration::days(1));

        p.spawn_copy(&copy, &TaskPlan::default(), None).await.unwrap();
        let err = p
            .spawn_copy(&copy, &TaskPlan::default(), None)
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "expected conflict, got {err}");

        let covering = p.list_copies_covering(now()).await.unwrap();
        assert_eq!(covering.len(), 1);
        assert!(
            p.list_copies_covering(now() + Duration::days(1))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_deleting_template_removes_its_copies() {
        let p = persistence().await;
        let mut template = origin("Template");
        template.kind = DefinitionKind::Template;
        let template = p
            .create_template(&template, &TaskPlan::default(), &[])
            .await
            .unwrap();
        let mut copy = origin("Copy");
        copy.kind = DefinitionKind::Copy;
        copy.origin_id = Some(template.id);
        copy.from_date = Some(now());
        copy.to_date = Some(now() + Duration::days(1));
        p.spawn_copy(&copy, &TaskPlan::default(), None).await.unwrap();

        sqlx::query("DELETE FROM maintenance_definitions WHERE id = ?")
            .bind(template.id)
            .execute(p.pool())
            .await
            .unwrap();

        assert!(
            p.list_definitions(DefinitionKind::Copy, Some(template.id))
                .await
                .unwrap()
                .is_empty()
        );
        assert!(p.list_copies_covering(now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_template_writes_rules_or_nothing() {
        let p = persistence().await;
        let mut template = origin("Template");
        template.kind = DefinitionKind::Template;
        let rule = |value| PlannedReminder {
            measurement: Measurement::Hour,
            value,
            previous_value: Some(120),
            origin_id: None,
        };

        // Two rules of one measurement violate the per-definition uniqueness.
        let err = p
            .create_template(&template, &TaskPlan::default(), &[rule(10), rule(20)])
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "expected conflict, got {err}");
        assert!(
            p.list_definitions(DefinitionKind::Template, None)
                .await
                .unwrap()
                .is_empty()
        );

        let created = p
            .create_template(&template, &TaskPlan::default(), &[rule(10)])
            .await
            .unwrap();
        let rules = p.list_reminders(created.id).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].value, 10);
        assert_eq!(rules[0].previous_value, Some(120));
        assert_eq!(rules[0].last_fired_on, None);
    }

    #[tokio::test]
    async fn test_delete_task_cascades() {
        let p = persistence().await;
        let def = p
            .create_definition(&origin("Service"), &TaskPlan::default())
            .await
            .unwrap();
        let root = p.create_task(def.id, None, "Root").await.unwrap();
        let child = p.create_task(def.id, Some(root.id), "Child").await.unwrap();
        p.create_task(def.id, Some(child.id), "Leaf").await.unwrap();

        p.delete_task(root.id).await.unwrap();
        assert!(p.list_tasks(def.id).await.unwrap().is_empty());
        assert_eq!(
            p.delete_task(root.id).await.unwrap_err().error_code(),
            "TASK_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_reminder_upsert_and_advance_once_per_day() {
        let p = persistence().await;
        let def = p
            .create_definition(&origin("Service"), &TaskPlan::default())
            .await
            .unwrap();
        let rule = p
            .upsert_reminder(&ReminderUpsert {
                definition_id: def.id,
                measurement: Measurement::Hour,
                value: 10,
                previous_value: Some(100),
                origin_id: None,
            })
            .await
            .unwrap();
        assert_eq!(rule.previous_value, Some(100));

        let today = now().date_naive();
        assert!(p.advance_reminder(rule.id, 110, today).await.unwrap());
        assert!(!p.advance_reminder(rule.id, 120, today).await.unwrap());
        let rules = p.list_reminders(def.id).await.unwrap();
        assert_eq!(rules[0].previous_value, Some(110));
        assert_eq!(rules[0].last_fired_on, Some(today));

        // Re-upserting the same measurement replaces instead of duplicating.
        let replaced = p
            .upsert_reminder(&ReminderUpsert {
                definition_id: def.id,
                measurement: Measurement::Hour,
                value: 20,
                previous_value: Some(150),
                origin_id: None,
            })
            .await
            .unwrap();
        assert_eq!(replaced.id, rule.id);
        assert_eq!(replaced.value, 20);
        assert_eq!(replaced.last_fired_on, None);
        assert_eq!(p.list_reminders(def.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_latest_meter_reading() {
        let p = persistence().await;
        let e = entity(&p, EntityStatus::Working).await;
        assert_eq!(p.latest_meter_reading(e.id).await.unwrap(), None);

        let day = |offset: i64| NewChecklist {
            entity_id: e.id,
            checklist_type: ChecklistType::Daily,
            from_date: now() + Duration::days(offset),
            to_date: now() + Duration::days(offset + 1),
            created_at: now(),
        };
        let first = p.create_checklist(&day(0), &[]).await.unwrap();
        let second = p.create_checklist(&day(1), &[]).await.unwrap();
        p.create_checklist(&day(2), &[]).await.unwrap();

        p.record_checklist_reading(first.id, 120).await.unwrap();
        p.record_checklist_reading(second.id, 135).await.unwrap();
        assert_eq!(p.latest_meter_reading(e.id).await.unwrap(), Some(135));
    }

    #[tokio::test]
    async fn test_checklist_template_assignment() {
        let p = persistence().await;
        let e = entity(&p, EntityStatus::Working).await;
        let items = vec!["Tyres".to_string(), "Lights".to_string()];
        let template = p
            .create_checklist_template("Daily walkaround", ChecklistType::Daily, &items)
            .await
            .unwrap();
        p.assign_checklist_template(e.id, ChecklistType::Daily, template.id)
            .await
            .unwrap();

        let assigned = p
            .get_assigned_checklist_template(e.id, ChecklistType::Daily)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(assigned, template);
        assert_eq!(
            p.list_checklist_template_items(template.id).await.unwrap(),
            items
        );
        assert!(
            p.get_assigned_checklist_template(e.id, ChecklistType::Weekly)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_notification_dedup_key() {
        let p = persistence().await;
        let n = NewNotification {
            dedup_key: "k-1",
            user_id: 5,
            body: "Oil change due",
            link: Some("/maintenance/1"),
            created_at: now(),
        };
        assert!(p.insert_notification(&n).await.unwrap());
        assert!(!p.insert_notification(&n).await.unwrap());
        assert_eq!(p.list_notifications(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_job_queue_claim_and_retry() {
        let p = persistence().await;
        let id = p.enqueue_job("notify", "{}", now()).await.unwrap();
        p.enqueue_job("notify", "{}", now() + Duration::hours(1))
            .await
            .unwrap();

        let claimed = p
            .claim_jobs(now(), now() + Duration::minutes(5), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
        assert_eq!(claimed[0].attempts, 1);

        // Invisible until the visibility window passes.
        assert!(
            p.claim_jobs(now(), now() + Duration::minutes(5), 10)
                .await
                .unwrap()
                .is_empty()
        );

        p.fail_job(id, "boom", Some(now())).await.unwrap();
        let retried = p
            .claim_jobs(now(), now() + Duration::minutes(5), 10)
            .await
            .unwrap();
        assert_eq!(retried[0].attempts, 2);
        assert_eq!(retried[0].last_error.as_deref(), Some("boom"));

        p.complete_job(id).await.unwrap();
        assert_eq!(p.count_jobs("done").await.unwrap(), 1);
        assert_eq!(p.count_jobs("pending").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lease_exclusivity() {
        let p = persistence().await;
        let until = now() + Duration::minutes(10);

        assert!(p.try_acquire_lease("gen", "a", now(), until).await.unwrap());
        assert!(!p.try_acquire_lease("gen", "b", now(), until).await.unwrap());
        // Holder may renew.
        assert!(p.try_acquire_lease("gen", "a", now(), until).await.unwrap());
        // Expired lease can be taken over.
        assert!(
            p.try_acquire_lease("gen", "b", until, until + Duration::minutes(10))
                .await
                .unwrap()
        );

        p.release_lease("gen", "b").await.unwrap();
        assert!(p.try_acquire_lease("gen", "c", now(), until).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_backed_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("upkeep.db");
        let p = SqlitePersistence::from_path(&path).await.unwrap();
        assert!(p.health_check_db().await.unwrap());
        assert!(path.exists());
    }
}
