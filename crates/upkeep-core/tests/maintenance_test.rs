// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for editing operations on definitions and tasks.

mod common;

use common::*;
use upkeep_core::jobs::Job;
use upkeep_core::maintenance::{self, NewOrigin};
use upkeep_core::model::Measurement;
use upkeep_core::persistence::Persistence;

fn plans_propagation(jobs: &[Job]) -> bool {
    jobs.iter().any(|j| matches!(j, Job::PropagateOrigin { .. }))
}

fn history_actions(jobs: &[Job]) -> Vec<String> {
    jobs.iter()
        .filter_map(|j| match j {
            Job::RecordHistory { action, .. } => Some(action.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_create_origin_validates_fields() {
    let h = Harness::new(at(2026, 2, 9, 8)).await;

    let err = maintenance::create_origin(
        &h.ctx,
        NewOrigin {
            name: "   ".to_string(),
            description: None,
            measurement: Measurement::Day,
            value: 1,
        },
        None,
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    assert!(err.is_client_error());

    let err = maintenance::create_origin(
        &h.ctx,
        NewOrigin {
            name: "Negative".to_string(),
            description: None,
            measurement: Measurement::Day,
            value: -3,
        },
        None,
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    let (origin, effects) = maintenance::create_origin(
        &h.ctx,
        NewOrigin {
            name: "Annual survey".to_string(),
            description: Some("Class society".to_string()),
            measurement: Measurement::Month,
            value: 12,
        },
        Some(4),
    )
    .await
    .unwrap();
    assert_eq!(origin.entity_id, None);
    assert_eq!(origin.origin_id, None);
    assert_eq!(history_actions(effects.jobs()), vec!["created".to_string()]);
    assert!(!plans_propagation(effects.jobs()));
}

#[tokio::test]
async fn test_task_depth_is_limited_to_three_levels() {
    let h = Harness::new(at(2026, 2, 9, 8)).await;
    let origin = h.origin("Deep", Measurement::Day, 1).await;

    let (level1, _) = maintenance::add_task(&h.ctx, origin.id, None, "Level 1", None)
        .await
        .unwrap();
    let (level2, _) = maintenance::add_task(&h.ctx, origin.id, Some(level1.id), "Level 2", None)
        .await
        .unwrap();
    let (level3, _) = maintenance::add_task(&h.ctx, origin.id, Some(level2.id), "Level 3", None)
        .await
        .unwrap();

    let err = maintenance::add_task(&h.ctx, origin.id, Some(level3.id), "Level 4", None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "TASK_DEPTH_EXCEEDED");
    assert_eq!(h.store.list_tasks(origin.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_add_task_rejects_foreign_parent_and_blank_name() {
    let h = Harness::new(at(2026, 2, 9, 8)).await;
    let first = h.origin("First", Measurement::Day, 1).await;
    let second = h.origin("Second", Measurement::Day, 1).await;
    let (foreign, _) = maintenance::add_task(&h.ctx, first.id, None, "Foreign", None)
        .await
        .unwrap();

    let err = maintenance::add_task(&h.ctx, second.id, Some(foreign.id), "Child", None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    let err = maintenance::add_task(&h.ctx, second.id, None, "", None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    let err = maintenance::add_task(&h.ctx, second.id, Some(9999), "Orphan", None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "TASK_NOT_FOUND");

    let err = maintenance::add_task(&h.ctx, 9999, None, "Nowhere", None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DEFINITION_NOT_FOUND");
}

#[tokio::test]
async fn test_only_origin_task_edits_plan_propagation() {
    let h = Harness::new(at(2026, 2, 9, 8)).await;
    let entity = h.entity("Locomotive").await;
    let origin = h.origin("Bogie inspection", Measurement::Week, 2).await;
    let template = h.assign(origin.id, entity.id).await;

    let (origin_task, effects) = maintenance::add_task(&h.ctx, origin.id, None, "Wheels", None)
        .await
        .unwrap();
    assert!(plans_propagation(effects.jobs()));

    let (template_task, effects) =
        maintenance::add_task(&h.ctx, template.id, None, "Local check", None)
            .await
            .unwrap();
    assert!(!plans_propagation(effects.jobs()));
    assert_eq!(history_actions(effects.jobs()), vec!["task_added".to_string()]);

    let effects = maintenance::rename_task(&h.ctx, origin_task.id, " Wheelsets ", None)
        .await
        .unwrap();
    assert!(plans_propagation(effects.jobs()));
    assert_eq!(
        h.store.get_task(origin_task.id).await.unwrap().unwrap().name,
        "Wheelsets"
    );

    let effects = maintenance::rename_task(&h.ctx, template_task.id, "Local", None)
        .await
        .unwrap();
    assert!(!plans_propagation(effects.jobs()));

    let effects = maintenance::delete_task(&h.ctx, origin_task.id, None)
        .await
        .unwrap();
    assert!(plans_propagation(effects.jobs()));
    assert_eq!(history_actions(effects.jobs()), vec!["task_deleted".to_string()]);
}

#[tokio::test]
async fn test_delete_task_removes_subtree() {
    let h = Harness::new(at(2026, 2, 9, 8)).await;
    let origin = h.origin("Electrical", Measurement::Day, 30).await;
    let (panel, _) = maintenance::add_task(&h.ctx, origin.id, None, "Panel", None)
        .await
        .unwrap();
    let (breakers, _) = maintenance::add_task(&h.ctx, origin.id, Some(panel.id), "Breakers", None)
        .await
        .unwrap();
    maintenance::add_task(&h.ctx, origin.id, Some(breakers.id), "Torque", None)
        .await
        .unwrap();
    maintenance::add_task(&h.ctx, origin.id, None, "Lighting", None)
        .await
        .unwrap();

    maintenance::delete_task(&h.ctx, panel.id, None)
        .await
        .unwrap();

    let remaining: Vec<String> = h
        .store
        .list_tasks(origin.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(remaining, vec!["Lighting".to_string()]);

    let err = maintenance::delete_task(&h.ctx, panel.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "TASK_NOT_FOUND");
}

#[tokio::test]
async fn test_toggle_task_cascades_and_skips_actor() {
    let h = Harness::new(at(2026, 2, 9, 8)).await;
    let entity = h.entity("Reach stacker").await;
    for user in [21, 22, 23] {
        h.store.assign_user(entity.id, user).await.unwrap();
    }
    let origin = h.origin("Mast", Measurement::Day, 7).await;
    let template = h.assign(origin.id, entity.id).await;

    let (chains, _) = maintenance::add_task(&h.ctx, template.id, None, "Chains", None)
        .await
        .unwrap();
    let (lube, _) = maintenance::add_task(&h.ctx, template.id, Some(chains.id), "Lube", None)
        .await
        .unwrap();
    let (wipe, _) = maintenance::add_task(&h.ctx, template.id, Some(lube.id), "Wipe", None)
        .await
        .unwrap();
    let (forks, _) = maintenance::add_task(&h.ctx, template.id, None, "Forks", None)
        .await
        .unwrap();

    let (changed, effects) = maintenance::toggle_task(&h.ctx, chains.id, 22, true)
        .await
        .unwrap();
    assert_eq!(changed, 3);

    let mut notified: Vec<i64> = effects
        .jobs()
        .iter()
        .filter_map(|j| match j {
            Job::Notify { user_id, .. } => Some(*user_id),
            _ => None,
        })
        .collect();
    notified.sort_unstable();
    assert_eq!(notified, vec![21, 23]);
    assert_eq!(
        history_actions(effects.jobs()),
        vec!["task_completed".to_string()]
    );

    for id in [chains.id, lube.id, wipe.id] {
        let task = h.store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.completed_by, Some(22));
        assert_eq!(task.completed_at, Some(h.now()));
    }
    let untouched = h.store.get_task(forks.id).await.unwrap().unwrap();
    assert_eq!(untouched.completed_by, None);

    // Reopening a mid-level task clears only its subtree.
    let (changed, effects) = maintenance::toggle_task(&h.ctx, lube.id, 21, false)
        .await
        .unwrap();
    assert_eq!(changed, 2);
    assert_eq!(
        history_actions(effects.jobs()),
        vec!["task_reopened".to_string()]
    );
    assert_eq!(
        h.store.get_task(chains.id).await.unwrap().unwrap().completed_by,
        Some(22)
    );
    assert_eq!(
        h.store.get_task(wipe.id).await.unwrap().unwrap().completed_at,
        None
    );
}

#[tokio::test]
async fn test_assign_origin_rejects_duplicates_and_unknown_ids() {
    let h = Harness::new(at(2026, 2, 9, 8)).await;
    let entity = h.entity("Grader").await;
    h.store.assign_user(entity.id, 31).await.unwrap();
    h.store.assign_user(entity.id, 32).await.unwrap();
    let origin = h.origin("Blade", Measurement::Hour, 100).await;

    let (template, effects) = maintenance::assign_origin(&h.ctx, origin.id, entity.id, Some(31))
        .await
        .unwrap();
    assert_eq!(template.origin_id, Some(origin.id));
    assert_eq!(template.entity_id, Some(entity.id));
    assert_eq!(template.previous_reading, None);
    let notified: Vec<i64> = effects
        .jobs()
        .iter()
        .filter_map(|j| match j {
            Job::Notify { user_id, .. } => Some(*user_id),
            _ => None,
        })
        .collect();
    assert_eq!(notified, vec![32]);

    let err = maintenance::assign_origin(&h.ctx, origin.id, entity.id, None)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let err = maintenance::assign_origin(&h.ctx, origin.id, 999, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ENTITY_NOT_FOUND");

    let err = maintenance::assign_origin(&h.ctx, template.id, entity.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_DEFINITION_KIND");
}
