// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Interfaces to the parts of the application the engine only consumes.
//!
//! Meter readings, user assignments and notification delivery are owned by
//! other subsystems. Default implementations back the first two with the
//! store; delivery is pluggable.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use crate::clock::Clock;
use crate::error::CoreError;
use crate::persistence::{NewNotification, Persistence};

/// Source of the most recent meter reading for an entity.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Latest known reading, or `None` if nothing was recorded yet.
    async fn latest_reading(&self, entity_id: i64) -> Result<Option<i64>, CoreError>;
}

/// Users that should hear about an entity.
#[async_trait]
pub trait AssignmentDirectory: Send + Sync {
    /// Assigned user ids, ascending, without `exclude_user_id`.
    async fn entity_assignment_ids(
        &self,
        entity_id: i64,
        exclude_user_id: Option<i64>,
    ) -> Result<Vec<i64>, CoreError>;
}

/// A notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingNotification {
    /// Idempotency key; delivering the same key twice must be a no-op.
    pub dedup_key: String,
    /// Recipient.
    pub user_id: i64,
    /// Message body.
    pub body: String,
    /// Deep link into the application.
    pub link: Option<String>,
}

/// Notification delivery.
///
/// Callers treat delivery as fire-and-forget: failures are logged, and
/// redelivery with the same dedup key must not produce a second message.
#[async_trait]
pub trait NotificationDispatch: Send + Sync {
    /// Deliver one notification.
    async fn notify(&self, notification: &OutgoingNotification) -> Result<(), CoreError>;
}

/// Readings taken from the latest dated checklist that has one.
pub struct ChecklistReadings {
    persistence: Arc<dyn Persistence>,
}

impl ChecklistReadings {
    /// Read through the given store.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }
}

#[async_trait]
impl ReadingSource for ChecklistReadings {
    async fn latest_reading(&self, entity_id: i64) -> Result<Option<i64>, CoreError> {
        self.persistence.latest_meter_reading(entity_id).await
    }
}

/// Assignments read from the `entity_assignments` table.
pub struct StoreAssignments {
    persistence: Arc<dyn Persistence>,
}

impl StoreAssignments {
    /// Read through the given store.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }
}

#[async_trait]
impl AssignmentDirectory for StoreAssignments {
    async fn entity_assignment_ids(
        &self,
        entity_id: i64,
        exclude_user_id: Option<i64>,
    ) -> Result<Vec<i64>, CoreError> {
        let mut ids = self.persistence.entity_assignment_ids(entity_id).await?;
        if let Some(excluded) = exclude_user_id {
            ids.retain(|&id| id != excluded);
        }
        Ok(ids)
    }
}

/// Writes notifications to the in-app notifications table.
pub struct PersistedNotifier {
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
}

impl PersistedNotifier {
    /// Create a notifier writing through the given store.
    pub fn new(persistence: Arc<dyn Persistence>, clock: Arc<dyn Clock>) -> Self {
        Self { persistence, clock }
    }
}

#[async_trait]
impl NotificationDispatch for PersistedNotifier {
    async fn notify(&self, notification: &OutgoingNotification) -> Result<(), CoreError> {
        let inserted = self
            .persistence
            .insert_notification(&NewNotification {
                dedup_key: &notification.dedup_key,
                user_id: notification.user_id,
                body: &notification.body,
                link: notification.link.as_deref(),
                created_at: self.clock.now(),
            })
            .await?;

        if !inserted {
            info!(
                dedup_key = %notification.dedup_key,
                user_id = notification.user_id,
                "Notification already delivered, skipping"
            );
        }
        Ok(())
    }
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationDispatch for TracingNotifier {
    async fn notify(&self, notification: &OutgoingNotification) -> Result<(), CoreError> {
        info!(
            dedup_key = %notification.dedup_key,
            user_id = notification.user_id,
            body = %notification.body,
            link = ?notification.link,
            "Notification"
        );
        Ok(())
    }
}

/// In-memory notifier for tests. Deduplicates by key like a real sink.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OutgoingNotification>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, in delivery order.
    pub fn sent(&self) -> Vec<OutgoingNotification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl NotificationDispatch for RecordingNotifier {
    async fn notify(&self, notification: &OutgoingNotification) -> Result<(), CoreError> {
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        if !sent.iter().any(|n| n.dedup_key == notification.dedup_key) {
            sent.push(notification.clone());
        }
        Ok(())
    }
}
