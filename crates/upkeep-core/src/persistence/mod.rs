// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for upkeep-core.
//!
//! [`Persistence`] is the entity & template store the engine reads fresh on
//! every run. [`JobQueue`] is the background queue and lease table used by
//! the scheduler service. Both are implemented for PostgreSQL and SQLite.
//!
//! Multi-row writes that must be all-or-nothing (creating a definition with
//! its task tree, replacing a Template's tasks, toggling a subtree) are single
//! methods so each backend can wrap them in one transaction.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::CoreError;
use crate::model::{
    Checklist, ChecklistItem, ChecklistTemplate, ChecklistType, DefinitionFields, DefinitionKind,
    Entity, EntityStatus, HistoryRecord, MaintenanceDefinition, NewChecklist, NewDefinition,
    NewEntity, NotificationRecord, PlannedReminder, ReadingBaseline, ReminderRule,
    ReminderUpsert, TaskNode,
};
use crate::task_tree::TaskPlan;

/// Job row from the background queue.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueuedJob {
    /// Database primary key.
    pub id: i64,
    /// Job name (matches [`crate::jobs::Job::name`]).
    pub job_name: String,
    /// JSON-encoded job.
    pub payload: String,
    /// pending, running, done or dead.
    pub status: String,
    /// Delivery attempts so far, including the current one.
    pub attempts: i32,
    /// Error from the last failed attempt.
    pub last_error: Option<String>,
    /// When the job becomes (re)deliverable.
    pub run_at: DateTime<Utc>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
}

/// Notification row to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification<'a> {
    /// Idempotency key.
    pub dedup_key: &'a str,
    /// Recipient.
    pub user_id: i64,
    /// Message body.
    pub body: &'a str,
    /// Deep link.
    pub link: Option<&'a str>,
    /// Write timestamp.
    pub created_at: DateTime<Utc>,
}

/// History row to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistory<'a> {
    /// Idempotency key.
    pub dedup_key: &'a str,
    /// Definition the entry is about.
    pub definition_id: i64,
    /// Acting user.
    pub actor_id: Option<i64>,
    /// Short action label.
    pub action: &'a str,
    /// Optional details.
    pub details: Option<&'a str>,
    /// Write timestamp.
    pub created_at: DateTime<Utc>,
}

/// Entity & template store used by the engine.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // ========================================================================
    // Entities & assignments
    // ========================================================================

    async fn create_entity(
        &self,
        entity: &NewEntity,
        created_at: DateTime<Utc>,
    ) -> Result<Entity, CoreError>;

    async fn get_entity(&self, id: i64) -> Result<Option<Entity>, CoreError>;

    /// Entities that are not soft-deleted and whose status is active.
    async fn list_active_entities(&self) -> Result<Vec<Entity>, CoreError>;

    async fn update_entity_status(&self, id: i64, status: EntityStatus) -> Result<(), CoreError>;

    async fn assign_user(&self, entity_id: i64, user_id: i64) -> Result<(), CoreError>;

    /// Users assigned to an entity, ascending.
    async fn entity_assignment_ids(&self, entity_id: i64) -> Result<Vec<i64>, CoreError>;

    // ========================================================================
    // Maintenance definitions
    // ========================================================================

    async fn get_definition(&self, id: i64) -> Result<Option<MaintenanceDefinition>, CoreError>;

    /// Definitions of one tier, optionally restricted to a parent, ascending by id.
    async fn list_definitions(
        &self,
        kind: DefinitionKind,
        origin_id: Option<i64>,
    ) -> Result<Vec<MaintenanceDefinition>, CoreError>;

    /// Templates whose entity is neither soft-deleted nor out of service,
    /// ascending by id.
    async fn list_active_templates(&self) -> Result<Vec<MaintenanceDefinition>, CoreError>;

    /// Copies whose `[from_date, to_date)` window contains `at`.
    async fn list_copies_covering(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceDefinition>, CoreError>;

    /// Insert a definition and its task tree in one transaction.
    async fn create_definition(
        &self,
        definition: &NewDefinition,
        tasks: &TaskPlan,
    ) -> Result<MaintenanceDefinition, CoreError>;

    /// Insert a Template, its task tree and its reminder rules in one
    /// transaction.
    async fn create_template(
        &self,
        template: &NewDefinition,
        tasks: &TaskPlan,
        reminders: &[PlannedReminder],
    ) -> Result<MaintenanceDefinition, CoreError>;

    /// Insert a Copy with its task tree and, when given, reset the generating
    /// Template's meter baseline, all in one transaction.
    async fn spawn_copy(
        &self,
        copy: &NewDefinition,
        tasks: &TaskPlan,
        baseline: Option<ReadingBaseline>,
    ) -> Result<MaintenanceDefinition, CoreError>;

    /// Write a Template's meter baseline.
    async fn set_reading_baseline(&self, baseline: &ReadingBaseline) -> Result<(), CoreError>;

    /// Overwrite structural fields and/or replace the whole task tree in one
    /// transaction. `None` leaves that part untouched.
    async fn update_definition(
        &self,
        id: i64,
        fields: Option<&DefinitionFields>,
        tasks: Option<&TaskPlan>,
    ) -> Result<(), CoreError>;

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Every task of a definition, ascending by id.
    async fn list_tasks(&self, definition_id: i64) -> Result<Vec<TaskNode>, CoreError>;

    async fn get_task(&self, id: i64) -> Result<Option<TaskNode>, CoreError>;

    async fn create_task(
        &self,
        definition_id: i64,
        parent_task_id: Option<i64>,
        name: &str,
    ) -> Result<TaskNode, CoreError>;

    /// Insert a planned tree under a definition in one transaction. Returns
    /// the created ids in plan order.
    async fn insert_tasks(&self, definition_id: i64, plan: &TaskPlan)
    -> Result<Vec<i64>, CoreError>;

    async fn rename_task(&self, id: i64, name: &str) -> Result<(), CoreError>;

    /// Delete a task; subtasks go with it.
    async fn delete_task(&self, id: i64) -> Result<(), CoreError>;

    /// Set or clear completion on several tasks in one transaction.
    async fn set_task_completion(
        &self,
        ids: &[i64],
        completed_by: Option<i64>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64, CoreError>;

    // ========================================================================
    // Reminder rules
    // ========================================================================

    /// Rules of a definition, ascending by id.
    async fn list_reminders(&self, definition_id: i64) -> Result<Vec<ReminderRule>, CoreError>;

    /// Insert or replace the rule for `(definition_id, measurement)`.
    async fn upsert_reminder(&self, reminder: &ReminderUpsert) -> Result<ReminderRule, CoreError>;

    /// Move a rule's reference point, at most once per `fired_on` day.
    ///
    /// Returns false when the rule already fired on that day.
    async fn advance_reminder(
        &self,
        id: i64,
        previous_value: i64,
        fired_on: NaiveDate,
    ) -> Result<bool, CoreError>;

    // ========================================================================
    // Checklists
    // ========================================================================

    async fn create_checklist_template(
        &self,
        name: &str,
        checklist_type: ChecklistType,
        items: &[String],
    ) -> Result<ChecklistTemplate, CoreError>;

    async fn assign_checklist_template(
        &self,
        entity_id: i64,
        checklist_type: ChecklistType,
        template_id: i64,
    ) -> Result<(), CoreError>;

    async fn get_assigned_checklist_template(
        &self,
        entity_id: i64,
        checklist_type: ChecklistType,
    ) -> Result<Option<ChecklistTemplate>, CoreError>;

    /// Item names of a checklist template, ascending by id.
    async fn list_checklist_template_items(
        &self,
        template_id: i64,
    ) -> Result<Vec<String>, CoreError>;

    async fn find_checklist_covering(
        &self,
        entity_id: i64,
        checklist_type: ChecklistType,
        at: DateTime<Utc>,
    ) -> Result<Option<Checklist>, CoreError>;

    /// Insert a checklist and its items in one transaction.
    async fn create_checklist(
        &self,
        checklist: &NewChecklist,
        items: &[String],
    ) -> Result<Checklist, CoreError>;

    async fn get_checklist(&self, id: i64) -> Result<Option<Checklist>, CoreError>;

    /// Checklists of an entity, newest window first.
    async fn list_checklists(&self, entity_id: i64) -> Result<Vec<Checklist>, CoreError>;

    async fn list_checklist_items(&self, checklist_id: i64)
    -> Result<Vec<ChecklistItem>, CoreError>;

    async fn record_checklist_reading(
        &self,
        checklist_id: i64,
        reading: i64,
    ) -> Result<(), CoreError>;

    /// Reading of the entity's most recent checklist that has one.
    async fn latest_meter_reading(&self, entity_id: i64) -> Result<Option<i64>, CoreError>;

    // ========================================================================
    // Notifications & history
    // ========================================================================

    /// Insert unless the dedup key was already written. Returns whether a row was added.
    async fn insert_notification(
        &self,
        notification: &NewNotification<'_>,
    ) -> Result<bool, CoreError>;

    async fn list_notifications(&self, user_id: i64)
    -> Result<Vec<NotificationRecord>, CoreError>;

    /// Insert unless the dedup key was already written. Returns whether a row was added.
    async fn insert_history(&self, entry: &NewHistory<'_>) -> Result<bool, CoreError>;

    async fn list_history(&self, definition_id: i64) -> Result<Vec<HistoryRecord>, CoreError>;

    async fn health_check_db(&self) -> Result<bool, CoreError>;
}

/// Persistent background queue and named leases.
#[allow(missing_docs)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue_job(
        &self,
        job_name: &str,
        payload: &str,
        run_at: DateTime<Utc>,
    ) -> Result<i64, CoreError>;

    /// Claim up to `limit` deliverable jobs.
    ///
    /// Pending jobs due at `now` and running jobs whose visibility expired are
    /// claimed; their `run_at` moves to `visible_until` and `attempts` grows by one.
    async fn claim_jobs(
        &self,
        now: DateTime<Utc>,
        visible_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueuedJob>, CoreError>;

    async fn complete_job(&self, id: i64) -> Result<(), CoreError>;

    /// Record a failure. With `retry_at` the job becomes pending again,
    /// otherwise it is marked dead.
    async fn fail_job(
        &self,
        id: i64,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError>;

    async fn count_jobs(&self, status: &str) -> Result<i64, CoreError>;

    /// Take or renew a named lease. Fails while another holder's lease is live.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), CoreError>;
}
