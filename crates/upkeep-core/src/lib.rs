// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upkeep Core - Periodic Maintenance Engine
//!
//! This crate generates dated maintenance work and checklists for a fleet of
//! machines, vessels and vehicles, and reminds the people assigned to them.
//!
//! # Definition Chain
//!
//! ```text
//!   ┌──────────┐  assign_origin   ┌────────────┐  daily, when due  ┌────────┐
//!   │  Origin  │─────────────────►│  Template  │──────────────────►│  Copy  │
//!   │ (master) │                  │ (1 entity) │                   │ (1 day)│
//!   └──────────┘                  └────────────┘                   └────────┘
//!        │      propagate_origin        ▲
//!        └──────────────────────────────┘
//! ```
//!
//! - An **Origin** is entity-agnostic: name, measurement, threshold, tasks.
//! - A **Template** binds an Origin to one entity and carries that entity's
//!   meter baseline. Origin edits flow down to Templates in the background.
//! - A **Copy** is a dated instance spawned from a Template when its
//!   recurrence threshold is reached, with a fresh clone of the task tree.
//!
//! # Measurements
//!
//! | Measurement | Quantity | Due when |
//! |-------------|----------|----------|
//! | `hour`, `kilometer` | entity meter reading | distance from baseline ≥ value |
//! | `day`, `week`, `month` | days since creation | elapsed is a multiple of value × 1/7/30 |
//! | `none` | - | never |
//!
//! # Daily Jobs
//!
//! | Job | Entry point |
//! |-----|-------------|
//! | Copy generation | [`generation::generate_periodic_maintenances`] |
//! | Checklist generation | [`checklist::generate_checklists`] |
//! | Reminders | [`reminder::notification_reminder`] |
//!
//! All three are idempotent per day. Side effects (notifications, history,
//! propagation) are returned as [`effects::Effects`] and flushed to the
//! [`persistence::JobQueue`] after the primary write committed; the
//! [`jobs::JobExecutor`] runs them.
//!
//! # Modules
//!
//! - [`measurement`]: Recurrence evaluation
//! - [`task_tree`]: Task hierarchy arena and cloning
//! - [`propagation`]: Origin → Template propagation
//! - [`generation`]: Copy generation
//! - [`checklist`]: Checklist generation and readings
//! - [`reminder`]: Reminder rules
//! - [`maintenance`]: Editing operations
//! - [`persistence`]: Store traits with PostgreSQL and SQLite backends

#![deny(missing_docs)]

/// Embedded database migrations for PostgreSQL and SQLite.
pub mod migrations;

/// Error types for engine operations.
pub mod error;

/// Domain records.
pub mod model;

/// Time source and date windows.
pub mod clock;

/// Recurrence evaluation over heterogeneous units.
pub mod measurement;

/// Task hierarchy arena and transactional cloning.
pub mod task_tree;

/// Store interfaces and backends.
pub mod persistence;

/// Reading source, assignment directory and notification delivery.
pub mod collaborators;

/// Shared dependencies for engine operations.
pub mod context;

/// Deferred side effects.
pub mod effects;

/// Background job model and executor.
pub mod jobs;

/// Origin → Template propagation.
pub mod propagation;

/// Daily maintenance Copy generation.
pub mod generation;

/// Checklist generation and operator readings.
pub mod checklist;

/// Notification reminder rules.
pub mod reminder;

/// Editing operations that trigger propagation.
pub mod maintenance;

pub use context::MaintenanceContext;
pub use error::{CoreError, Result};
