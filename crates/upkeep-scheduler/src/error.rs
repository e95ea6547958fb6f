// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for upkeep-scheduler.

use thiserror::Error;

/// Scheduler service errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Engine operation failed.
    #[error("Core error: {0}")]
    Core(#[from] upkeep_core::CoreError),

    /// A cron expression could not be parsed or has no next occurrence.
    #[error("Schedule error: {0}")]
    Schedule(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the scheduler Error.
pub type Result<T> = std::result::Result<T, Error>;
