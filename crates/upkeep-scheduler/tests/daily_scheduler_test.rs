// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the daily scheduler.

mod common;

use std::sync::atomic::Ordering;

use chrono::Duration;
use common::*;
use upkeep_core::model::Measurement;
use upkeep_core::persistence::{JobQueue, Persistence};
use upkeep_core::reminder::upsert_pm_notification_reminder;
use upkeep_scheduler::daily_scheduler::{
    DailyScheduler, DailySchedulerConfig, GENERATION_LEASE, REMINDER_LEASE,
};

#[tokio::test]
async fn test_generation_run_creates_copies_and_checklists_once() {
    let h = Harness::new(at(2026, 9, 7, 5)).await;
    let entity = h.entity("Bus 12").await;
    let template = h.template(entity, Measurement::Week, 1).await;
    let scheduler = h.scheduler(quiet_scheduler_config());

    let run = scheduler.run_generation().await.unwrap().unwrap();
    assert_eq!(run.maintenances.created, 1);
    assert_eq!(run.checklists.created, 2);
    assert_eq!(h.copies_of(template.id).await, 1);

    let run = scheduler.run_generation().await.unwrap().unwrap();
    assert_eq!(run.maintenances.created, 0);
    assert_eq!(run.maintenances.already_generated, 1);
    assert_eq!(run.checklists.created, 0);
    assert_eq!(run.checklists.already_generated, 2);

    // Lease is released after each run.
    assert!(
        h.store
            .try_acquire_lease(GENERATION_LEASE, "other-host", h.now(), h.now() + Duration::minutes(1))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_generation_skipped_while_lease_held_elsewhere() {
    let h = Harness::new(at(2026, 9, 7, 5)).await;
    let entity = h.entity("Bus 14").await;
    let template = h.template(entity, Measurement::Day, 1).await;
    let scheduler = h.scheduler(quiet_scheduler_config());

    assert!(
        h.store
            .try_acquire_lease(GENERATION_LEASE, "other-node", h.now(), h.now() + Duration::hours(1))
            .await
            .unwrap()
    );

    assert!(scheduler.run_generation().await.unwrap().is_none());
    assert_eq!(h.copies_of(template.id).await, 0);

    // The foreign lease expires.
    h.clock.advance(Duration::hours(2));
    assert!(scheduler.run_generation().await.unwrap().is_some());
    assert_eq!(h.copies_of(template.id).await, 1);
}

#[tokio::test]
async fn test_overlapping_runs_in_one_process_are_single_flight() {
    let h = Harness::new(at(2026, 9, 7, 5)).await;
    let entity = h.entity("Bus 16").await;
    let template = h.template(entity, Measurement::Day, 1).await;
    let scheduler = h.scheduler(quiet_scheduler_config());

    let (first, second) = tokio::join!(scheduler.run_generation(), scheduler.run_generation());
    let completed = [first.unwrap(), second.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(h.copies_of(template.id).await, 1);
}

#[tokio::test]
async fn test_cancelled_scheduler_starts_no_runs() {
    let h = Harness::new(at(2026, 9, 7, 5)).await;
    let entity = h.entity("Bus 18").await;
    let template = h.template(entity, Measurement::Day, 1).await;
    let scheduler = h.scheduler(DailySchedulerConfig {
        batch_size: 1,
        ..quiet_scheduler_config()
    });

    scheduler.cancel_handle().store(true, Ordering::Relaxed);
    assert!(scheduler.run_generation().await.unwrap().is_none());
    assert!(scheduler.run_reminders().await.unwrap().is_none());
    assert_eq!(h.copies_of(template.id).await, 0);
}

#[tokio::test]
async fn test_reminder_run_enqueues_notifications_for_worker() {
    let h = Harness::new(at(2026, 9, 7, 6)).await;
    let entity = h.entity("Bus 20").await;
    h.store.assign_user(entity, 301).await.unwrap();
    let template = h.template(entity, Measurement::Month, 6).await;
    upsert_pm_notification_reminder(&h.ctx, template.id, Measurement::Day, 3)
        .await
        .unwrap();
    let scheduler = h.scheduler(quiet_scheduler_config());

    let run = scheduler.run_reminders().await.unwrap().unwrap();
    assert_eq!(run.report.fired, 0);
    assert_eq!(run.enqueued, 0);

    h.clock.advance(Duration::days(3));
    let run = scheduler.run_reminders().await.unwrap().unwrap();
    assert_eq!(run.report.fired, 1);
    // One notification and one history entry.
    assert_eq!(run.enqueued, 2);
    assert_eq!(h.store.count_jobs("pending").await.unwrap(), 2);

    let report = h.worker(fast_worker_config()).process_batch().await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.completed, 2);

    let notifications = h.store.list_notifications(301).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].link.as_deref(),
        Some(format!("/maintenance/{}", template.id).as_str())
    );

    // Lease is free again.
    assert!(
        h.store
            .try_acquire_lease(REMINDER_LEASE, "other-host", h.now(), h.now() + Duration::minutes(1))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_invalid_schedule_is_rejected() {
    let h = Harness::new(at(2026, 9, 7, 5)).await;
    let result = DailyScheduler::new(
        h.ctx.clone(),
        h.store.clone(),
        DailySchedulerConfig {
            generation_schedule: "whenever".to_string(),
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(upkeep_scheduler::Error::Schedule(_))));
}
