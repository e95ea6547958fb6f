// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::daily_scheduler::DailySchedulerConfig;
use crate::job_worker::JobWorkerConfig;
use crate::schedule::Schedule;

/// Scheduler service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Pool size
    pub db_max_connections: u32,
    /// Daily job settings
    pub scheduler: DailySchedulerConfig,
    /// Background queue settings
    pub worker: JobWorkerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `UPKEEP_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `UPKEEP_GENERATION_SCHEDULE`: cron for copy and checklist generation (default: `0 5 * * *`)
    /// - `UPKEEP_REMINDER_SCHEDULE`: cron for reminders (default: `0 6 * * *`)
    /// - `UPKEEP_RUN_ON_STARTUP`: run both daily jobs once at startup (default: true)
    /// - `UPKEEP_GENERATION_BATCH_SIZE`: records per chunk (default: 100)
    /// - `UPKEEP_LEASE_TTL_SECS`: lifetime of the cross-process run lease (default: 3600)
    /// - `UPKEEP_JOB_POLL_INTERVAL_SECS`: queue poll interval (default: 5)
    /// - `UPKEEP_JOB_BATCH_SIZE`: jobs claimed per poll (default: 20)
    /// - `UPKEEP_JOB_MAX_ATTEMPTS`: deliveries before a job is dead (default: 5)
    /// - `UPKEEP_DB_MAX_CONNECTIONS`: pool size (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("UPKEEP_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("UPKEEP_DATABASE_URL"))?;

        let scheduler_defaults = DailySchedulerConfig::default();
        let generation_schedule =
            schedule_var("UPKEEP_GENERATION_SCHEDULE", &scheduler_defaults.generation_schedule)?;
        let reminder_schedule =
            schedule_var("UPKEEP_REMINDER_SCHEDULE", &scheduler_defaults.reminder_schedule)?;

        let run_on_startup = std::env::var("UPKEEP_RUN_ON_STARTUP")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(scheduler_defaults.run_on_startup);

        let batch_size: usize = parse_var(
            "UPKEEP_GENERATION_BATCH_SIZE",
            scheduler_defaults.batch_size,
            "must be a positive integer",
        )?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid(
                "UPKEEP_GENERATION_BATCH_SIZE",
                "must be a positive integer",
            ));
        }

        let lease_ttl_secs: u64 = parse_var(
            "UPKEEP_LEASE_TTL_SECS",
            scheduler_defaults.lease_ttl.as_secs(),
            "must be a number of seconds",
        )?;

        let worker_defaults = JobWorkerConfig::default();
        let poll_interval_secs: u64 = parse_var(
            "UPKEEP_JOB_POLL_INTERVAL_SECS",
            worker_defaults.poll_interval.as_secs(),
            "must be a number of seconds",
        )?;
        let job_batch_size: i64 = parse_var(
            "UPKEEP_JOB_BATCH_SIZE",
            worker_defaults.batch_size,
            "must be a positive integer",
        )?;
        let max_attempts: i32 = parse_var(
            "UPKEEP_JOB_MAX_ATTEMPTS",
            worker_defaults.max_attempts,
            "must be a positive integer",
        )?;
        if job_batch_size <= 0 {
            return Err(ConfigError::Invalid(
                "UPKEEP_JOB_BATCH_SIZE",
                "must be a positive integer",
            ));
        }
        if max_attempts <= 0 {
            return Err(ConfigError::Invalid(
                "UPKEEP_JOB_MAX_ATTEMPTS",
                "must be a positive integer",
            ));
        }

        let db_max_connections: u32 = parse_var(
            "UPKEEP_DB_MAX_CONNECTIONS",
            10,
            "must be a positive integer",
        )?;

        Ok(Self {
            database_url,
            db_max_connections,
            scheduler: DailySchedulerConfig {
                generation_schedule,
                reminder_schedule,
                run_on_startup,
                batch_size,
                lease_ttl: Duration::from_secs(lease_ttl_secs),
            },
            worker: JobWorkerConfig {
                poll_interval: Duration::from_secs(poll_interval_secs),
                batch_size: job_batch_size,
                max_attempts,
                ..worker_defaults
            },
        })
    }

    /// Whether the database URL points at SQLite.
    pub fn is_sqlite(&self) -> bool {
        self.database_url.starts_with("sqlite:")
    }
}

fn parse_var<T: FromStr>(
    key: &'static str,
    default: T,
    hint: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, hint)),
        Err(_) => Ok(default),
    }
}

fn schedule_var(key: &'static str, default: &str) -> Result<String, ConfigError> {
    let expression = std::env::var(key).unwrap_or_else(|_| default.to_string());
    Schedule::parse(&expression).map_err(|e| ConfigError::InvalidSchedule {
        key,
        reason: e.to_string(),
    })?;
    Ok(expression)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
    /// A cron expression does not parse.
    #[error("invalid schedule in {key}: {reason}")]
    InvalidSchedule {
        /// Variable name.
        key: &'static str,
        /// Parser message.
        reason: String,
    },
}
