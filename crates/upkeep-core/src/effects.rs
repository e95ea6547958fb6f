// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deferred side effects.
//!
//! Engine operations never notify or write history inline. They return an
//! [`Effects`] list that the caller flushes to the job queue once the primary
//! change has committed. Each notification and history entry gets its dedup
//! key here, at planning time, so a redelivered job cannot duplicate rows.

use tracing::{debug, error};
use uuid::Uuid;

use crate::clock::Clock;
use crate::jobs::Job;
use crate::persistence::JobQueue;

/// Side effects planned by an engine call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effects {
    jobs: Vec<Job>,
}

impl Effects {
    /// No effects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan a notification.
    pub fn notify(&mut self, user_id: i64, body: impl Into<String>, link: Option<String>) {
        self.jobs.push(Job::Notify {
            dedup_key: Uuid::new_v4().to_string(),
            user_id,
            body: body.into(),
            link,
        });
    }

    /// Plan a history entry.
    pub fn history(
        &mut self,
        definition_id: i64,
        actor_id: Option<i64>,
        action: impl Into<String>,
        details: Option<String>,
    ) {
        self.jobs.push(Job::RecordHistory {
            dedup_key: Uuid::new_v4().to_string(),
            definition_id,
            actor_id,
            action: action.into(),
            details,
        });
    }

    /// Plan a propagation of an Origin to its Templates.
    pub fn propagate(&mut self, origin_id: i64, scalar_fields_changed: bool, tasks_changed: bool) {
        self.jobs.push(Job::PropagateOrigin {
            origin_id,
            scalar_fields_changed,
            tasks_changed,
        });
    }

    /// Append another call's effects.
    pub fn extend(&mut self, other: Effects) {
        self.jobs.extend(other.jobs);
    }

    /// Planned jobs, in planning order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Number of planned jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether nothing was planned.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Enqueue planned effects. Failures are logged and skipped.
///
/// Returns how many jobs were enqueued.
pub async fn flush_effects(effects: Effects, queue: &dyn JobQueue, clock: &dyn Clock) -> usize {
    let now = clock.now();
    let mut enqueued = 0;

    for job in effects.jobs {
        let payload = match job.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(job = job.name(), error = %e, "Failed to encode job");
                continue;
            }
        };

        match queue.enqueue_job(job.name(), &payload, now).await {
            Ok(id) => {
                debug!(job = job.name(), job_id = id, "Enqueued job");
                enqueued += 1;
            }
            Err(e) => {
                error!(job = job.name(), error = %e, "Failed to enqueue job");
            }
        }
    }

    enqueued
}
