// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain records shared by the engine and the persistence backends.
//!
//! Enum-valued columns are stored as lowercase text and decoded through
//! `TryFrom<String>` so both SQLite and PostgreSQL rows map onto the same
//! structs.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Database/text representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            /// Parse from the database/text representation.
            #[allow(clippy::should_implement_trait)]
            pub fn from_str(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::from_str(&value)
                    .ok_or_else(|| format!("unknown {} value '{}'", stringify!($name), value))
            }
        }
    };
}

text_enum! {
    /// Tier of a maintenance definition in the Origin → Template → Copy chain.
    DefinitionKind {
        /// Entity-agnostic master definition.
        Origin => "origin",
        /// An Origin bound to one entity; carries that entity's reading state.
        Template => "template",
        /// A dated single-period instance generated from a Template.
        Copy => "copy",
    }
}

text_enum! {
    /// Unit governing recurrence for a definition or reminder.
    Measurement {
        /// Engine/operating hours (meter based).
        Hour => "hour",
        /// Distance travelled (meter based).
        Kilometer => "kilometer",
        /// Calendar days since the anchor date.
        Day => "day",
        /// Calendar weeks (7 days) since the anchor date.
        Week => "week",
        /// Months, always counted as 30 days.
        Month => "month",
        /// No recurrence configured.
        Unset => "none",
    }
}

text_enum! {
    /// Kind of asset maintenance is tracked for.
    EntityKind {
        /// Stationary machinery.
        Machine => "machine",
        /// Vessels and boats.
        Vessel => "vessel",
        /// Vehicles.
        Transportation => "transportation",
    }
}

text_enum! {
    /// Operational status of an entity.
    EntityStatus {
        /// In service.
        Working => "working",
        /// Available but not currently in use.
        Idle => "idle",
        /// Broken down; excluded from generation until repaired.
        Breakdown => "breakdown",
    }
}

text_enum! {
    /// Cadence of a checklist instance.
    ChecklistType {
        /// One checklist per calendar day.
        Daily => "daily",
        /// One checklist per ISO week (Monday start).
        Weekly => "weekly",
    }
}

impl Measurement {
    /// Whether the measurement is driven by a meter reading rather than the calendar.
    pub fn is_meter_based(&self) -> bool {
        matches!(self, Self::Hour | Self::Kilometer)
    }

    /// Whether the measurement is driven by elapsed calendar days.
    pub fn is_calendar_based(&self) -> bool {
        matches!(self, Self::Day | Self::Week | Self::Month)
    }
}

impl EntityStatus {
    /// Entities in this status take part in daily generation.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Working | Self::Idle)
    }
}

impl ChecklistType {
    /// Every checklist cadence, in generation order.
    pub const ALL: [ChecklistType; 2] = [ChecklistType::Daily, ChecklistType::Weekly];
}

/// An asset that owns checklists and maintenance templates.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Entity {
    /// Primary key.
    pub id: i64,
    /// Asset kind.
    #[sqlx(try_from = "String")]
    pub kind: EntityKind,
    /// Display name.
    pub name: String,
    /// Operational status.
    #[sqlx(try_from = "String")]
    pub status: EntityStatus,
    /// When the entity was registered.
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Whether generation should consider this entity.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && self.status.is_active()
    }
}

/// Fields for registering an entity.
#[derive(Debug, Clone)]
pub struct NewEntity {
    /// Asset kind.
    pub kind: EntityKind,
    /// Display name.
    pub name: String,
    /// Initial status.
    pub status: EntityStatus,
}

/// A recurring-work definition: Origin, Template or Copy.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MaintenanceDefinition {
    /// Primary key.
    pub id: i64,
    /// Tier in the propagation chain.
    #[sqlx(try_from = "String")]
    pub kind: DefinitionKind,
    /// Owning entity; `None` for Origins.
    pub entity_id: Option<i64>,
    /// For a Template, its Origin. For a Copy, the Template that generated it.
    pub origin_id: Option<i64>,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Recurrence unit.
    #[sqlx(try_from = "String")]
    pub measurement: Measurement,
    /// Recurrence threshold in `measurement` units.
    pub value: i64,
    /// Meter reading at the last generated Copy (meter-based only).
    pub previous_reading: Option<i64>,
    /// Most recent meter reading seen for the entity (meter-based only).
    pub current_reading: Option<i64>,
    /// Start of a Copy's window.
    pub from_date: Option<DateTime<Utc>>,
    /// Exclusive end of a Copy's window.
    pub to_date: Option<DateTime<Utc>>,
    /// Anchor for day/week/month arithmetic.
    pub created_at: DateTime<Utc>,
}

impl MaintenanceDefinition {
    /// Whether this Copy's window contains `at`.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        match (self.from_date, self.to_date) {
            (Some(from), Some(to)) => from <= at && at < to,
            _ => false,
        }
    }
}

/// Fields for inserting a definition.
#[derive(Debug, Clone)]
pub struct NewDefinition {
    /// Tier in the propagation chain.
    pub kind: DefinitionKind,
    /// Owning entity.
    pub entity_id: Option<i64>,
    /// Parent definition in the chain.
    pub origin_id: Option<i64>,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Recurrence unit.
    pub measurement: Measurement,
    /// Recurrence threshold.
    pub value: i64,
    /// Meter baseline.
    pub previous_reading: Option<i64>,
    /// Latest meter reading.
    pub current_reading: Option<i64>,
    /// Copy window start.
    pub from_date: Option<DateTime<Utc>>,
    /// Copy window end (exclusive).
    pub to_date: Option<DateTime<Utc>>,
    /// Creation timestamp (anchor date).
    pub created_at: DateTime<Utc>,
}

/// Structural fields that flow from an Origin to its Templates.
///
/// Reading state is deliberately absent: each Template tracks its own entity.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionFields {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Recurrence unit.
    pub measurement: Measurement,
    /// Recurrence threshold.
    pub value: i64,
}

impl From<&MaintenanceDefinition> for DefinitionFields {
    fn from(def: &MaintenanceDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            measurement: def.measurement,
            value: def.value,
        }
    }
}

/// Meter baseline written to a Template when a Copy is spawned from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingBaseline {
    /// Template receiving the baseline.
    pub template_id: i64,
    /// New `previous_reading`.
    pub previous_reading: i64,
    /// New `current_reading`.
    pub current_reading: i64,
}

/// A node of a definition's task hierarchy.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TaskNode {
    /// Primary key.
    pub id: i64,
    /// Owning definition.
    pub definition_id: i64,
    /// Parent task; `None` for root tasks.
    pub parent_task_id: Option<i64>,
    /// Task description.
    pub name: String,
    /// User who completed the task.
    pub completed_by: Option<i64>,
    /// When the task was completed.
    pub completed_at: Option<DateTime<Utc>>,
}

/// A per-measurement notification threshold attached to a definition.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ReminderRule {
    /// Primary key.
    pub id: i64,
    /// Owning definition.
    pub definition_id: i64,
    /// Unit of the threshold.
    #[sqlx(try_from = "String")]
    pub measurement: Measurement,
    /// Threshold in `measurement` units.
    pub value: i64,
    /// Reference point the next firing is measured from.
    pub previous_value: Option<i64>,
    /// Origin-level rule this Template-level rule derives from.
    pub origin_id: Option<i64>,
    /// Day the rule last fired; guards against double advancement.
    pub last_fired_on: Option<NaiveDate>,
}

/// Fields for creating or replacing a reminder rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderUpsert {
    /// Owning definition.
    pub definition_id: i64,
    /// Unit of the threshold.
    pub measurement: Measurement,
    /// Threshold.
    pub value: i64,
    /// Baseline reference point.
    pub previous_value: Option<i64>,
    /// Origin-level rule, for Template-level rules.
    pub origin_id: Option<i64>,
}

/// A reminder rule written together with a new Template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedReminder {
    /// Unit of the threshold.
    pub measurement: Measurement,
    /// Threshold.
    pub value: i64,
    /// Baseline reference point.
    pub previous_value: Option<i64>,
    /// Origin-level rule this one derives from.
    pub origin_id: Option<i64>,
}

/// Named flat list of checklist items.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ChecklistTemplate {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Cadence this template is meant for.
    #[sqlx(try_from = "String", rename = "type")]
    pub checklist_type: ChecklistType,
}

/// A dated checklist instance for an entity.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Checklist {
    /// Primary key.
    pub id: i64,
    /// Owning entity.
    pub entity_id: i64,
    /// Cadence.
    #[sqlx(try_from = "String", rename = "type")]
    pub checklist_type: ChecklistType,
    /// Window start.
    pub from_date: DateTime<Utc>,
    /// Window end (exclusive).
    pub to_date: DateTime<Utc>,
    /// Meter reading recorded by the operator.
    pub current_meter_reading: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Fields for inserting a checklist.
#[derive(Debug, Clone)]
pub struct NewChecklist {
    /// Owning entity.
    pub entity_id: i64,
    /// Cadence.
    pub checklist_type: ChecklistType,
    /// Window start.
    pub from_date: DateTime<Utc>,
    /// Window end (exclusive).
    pub to_date: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// An item of a checklist instance.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ChecklistItem {
    /// Primary key.
    pub id: i64,
    /// Owning checklist.
    pub checklist_id: i64,
    /// Item text.
    pub name: String,
    /// User who ticked the item.
    pub completed_by: Option<i64>,
    /// When the item was ticked.
    pub completed_at: Option<DateTime<Utc>>,
}

/// An in-app notification row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct NotificationRecord {
    /// Primary key.
    pub id: i64,
    /// Idempotency key assigned when the notification was planned.
    pub dedup_key: String,
    /// Recipient.
    pub user_id: i64,
    /// Message body.
    pub body: String,
    /// Deep link into the application.
    pub link: Option<String>,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

/// An audit trail entry for a definition.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct HistoryRecord {
    /// Primary key.
    pub id: i64,
    /// Idempotency key assigned when the entry was planned.
    pub dedup_key: String,
    /// Definition the entry is about.
    pub definition_id: i64,
    /// Acting user, `None` for scheduled jobs.
    pub actor_id: Option<i64>,
    /// Short action label.
    pub action: String,
    /// Optional free-form details.
    pub details: Option<String>,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}
