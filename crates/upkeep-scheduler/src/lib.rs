// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upkeep Scheduler - Daily Jobs and Background Queue
//!
//! Runs the engine's daily jobs on cron schedules and drains the background
//! job queue.
//!
//! ```text
//!   ┌──────────────────────┐  enqueue effects  ┌──────────────┐
//!   │   DailyScheduler     │──────────────────►│  job_queue   │
//!   │  generation  (cron)  │                   └──────┬───────┘
//!   │  reminders   (cron)  │                          │ claim
//!   └──────────┬───────────┘                          ▼
//!              │ lease                         ┌──────────────┐
//!              ▼                               │  JobWorker   │
//!        ┌────────────┐                        │  execute,    │
//!        │ job_leases │                        │  retry, dead │
//!        └────────────┘                        └──────────────┘
//! ```
//!
//! | Job | Default schedule |
//! |-----|------------------|
//! | Copy + checklist generation | `0 5 * * *` |
//! | Notification reminders | `0 6 * * *` |
//!
//! Both daily jobs are single-flight per process and across processes.

#![deny(missing_docs)]

/// Configuration loading from environment variables.
pub mod config;

/// Error types for the scheduler service.
pub mod error;

/// Cron schedules.
pub mod schedule;

/// Daily generation and reminder scheduler.
pub mod daily_scheduler;

/// Background job worker.
pub mod job_worker;

/// Embeddable runtime.
pub mod runtime;

pub use error::{Error, Result};
