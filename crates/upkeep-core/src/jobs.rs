// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background jobs and their executor.
//!
//! Jobs are serialized to JSON for the persistent queue. Every handler
//! either overwrites state or inserts under a dedup key, so executing the
//! same job twice leaves the store as if it ran once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collaborators::{NotificationDispatch, OutgoingNotification};
use crate::context::MaintenanceContext;
use crate::error::Result;
use crate::persistence::NewHistory;
use crate::propagation::{self, PropagationReport};

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    /// Re-apply an Origin's current state to its Templates.
    PropagateOrigin {
        /// Edited Origin.
        origin_id: i64,
        /// Overwrite name, description, measurement and value.
        scalar_fields_changed: bool,
        /// Replace the task trees.
        tasks_changed: bool,
    },
    /// Deliver one notification.
    Notify {
        /// Idempotency key.
        dedup_key: String,
        /// Recipient.
        user_id: i64,
        /// Message body.
        body: String,
        /// Deep link.
        link: Option<String>,
    },
    /// Append a history entry.
    RecordHistory {
        /// Idempotency key.
        dedup_key: String,
        /// Definition the entry is about.
        definition_id: i64,
        /// Acting user.
        actor_id: Option<i64>,
        /// Short action label.
        action: String,
        /// Optional details.
        details: Option<String>,
    },
}

impl Job {
    /// Queue name of the job.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PropagateOrigin { .. } => "propagate_origin",
            Self::Notify { .. } => "notify",
            Self::RecordHistory { .. } => "record_history",
        }
    }

    /// JSON payload for the queue.
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a queued payload.
    pub fn from_payload(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// What executing a job did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Origin propagation finished.
    Propagated(PropagationReport),
    /// Notification handed to the dispatcher.
    Notified,
    /// History entry written; `false` when the dedup key already existed.
    HistoryRecorded(bool),
}

/// Runs jobs against the engine.
#[derive(Clone)]
pub struct JobExecutor {
    ctx: MaintenanceContext,
    notifier: Arc<dyn NotificationDispatch>,
}

impl JobExecutor {
    /// Create an executor.
    pub fn new(ctx: MaintenanceContext, notifier: Arc<dyn NotificationDispatch>) -> Self {
        Self { ctx, notifier }
    }

    /// Execute one job.
    pub async fn execute(&self, job: &Job) -> Result<JobOutcome> {
        debug!(job = job.name(), "Executing job");
        match job {
            Job::PropagateOrigin {
                origin_id,
                scalar_fields_changed,
                tasks_changed,
            } => {
                let report = propagation::propagate_origin_change(
                    &self.ctx,
                    *origin_id,
                    *scalar_fields_changed,
                    *tasks_changed,
                )
                .await?;
                Ok(JobOutcome::Propagated(report))
            }
            Job::Notify {
                dedup_key,
                user_id,
                body,
                link,
            } => {
                self.notifier
                    .notify(&OutgoingNotification {
                        dedup_key: dedup_key.clone(),
                        user_id: *user_id,
                        body: body.clone(),
                        link: link.clone(),
                    })
                    .await?;
                Ok(JobOutcome::Notified)
            }
            Job::RecordHistory {
                dedup_key,
                definition_id,
                actor_id,
                action,
                details,
            } => {
                let inserted = self
                    .ctx
                    .persistence
                    .insert_history(&NewHistory {
                        dedup_key,
                        definition_id: *definition_id,
                        actor_id: *actor_id,
                        action,
                        details: details.as_deref(),
                        created_at: self.ctx.clock.now(),
                    })
                    .await?;
                if !inserted {
                    info!(%dedup_key, definition_id, "History entry already recorded");
                }
                Ok(JobOutcome::HistoryRecorded(inserted))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_payload_is_tagged() {
        let job = Job::PropagateOrigin {
            origin_id: 12,
            scalar_fields_changed: true,
            tasks_changed: false,
        };
        let payload = job.to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["type"], "propagate_origin");
        assert_eq!(value["origin_id"], 12);
        assert_eq!(Job::from_payload(&payload).unwrap(), job);
    }

    #[test]
    fn test_job_names() {
        let notify = Job::Notify {
            dedup_key: "k".into(),
            user_id: 1,
            body: "b".into(),
            link: None,
        };
        assert_eq!(notify.name(), "notify");
        let history = Job::RecordHistory {
            dedup_key: "k".into(),
            definition_id: 1,
            actor_id: None,
            action: "updated".into(),
            details: None,
        };
        assert_eq!(history.name(), "record_history");
    }

    #[test]
    fn test_unknown_payload_rejected() {
        let err = Job::from_payload(r#"{"type":"reindex"}"#).unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }
}
