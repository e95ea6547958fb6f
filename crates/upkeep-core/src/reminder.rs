// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Notification reminders.
//!
//! A reminder rule fires when the distance between its reference point
//! (`previous_value`) and the current quantity reaches the threshold. Meter
//! rules measure the entity's latest reading; calendar rules measure elapsed
//! days since the Template was created. Firing advances the reference point
//! by exactly one threshold, so it only ever moves forward.
//!
//! Advancement is keyed on the firing day: a second run on the same day, or a
//! redelivered job, finds the rule already fired and does nothing.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::elapsed_days;
use crate::context::MaintenanceContext;
use crate::effects::Effects;
use crate::error::{CoreError, Result};
use crate::generation::GenerationOptions;
use crate::measurement;
use crate::model::{
    DefinitionKind, MaintenanceDefinition, Measurement, NewDefinition, PlannedReminder,
    ReminderRule, ReminderUpsert,
};

/// Counters for one reminder run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderReport {
    /// Rules evaluated.
    pub rules: usize,
    /// Rules that fired and advanced.
    pub fired: usize,
    /// Rules whose threshold was not reached.
    pub not_due: usize,
    /// Due rules that had already fired today.
    pub already_fired: usize,
    /// Rules that failed; logged and skipped.
    pub failed: usize,
    /// Notifications planned.
    pub notifications: usize,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

enum RuleOutcome {
    Fired { notifications: usize },
    NotDue,
    AlreadyFired,
}

/// Evaluate every active Template's reminder rules and plan notifications
/// for the due ones.
///
/// Templates are processed in chunks of `options.batch_size`, yielding
/// between chunks; the cancel flag is checked before each Template.
pub async fn notification_reminder(
    ctx: &MaintenanceContext,
    options: &GenerationOptions,
) -> Result<(ReminderReport, Effects)> {
    let now = ctx.clock.now();
    let today = ctx.clock.today();
    let templates = ctx.persistence.list_active_templates().await?;

    let mut report = ReminderReport::default();
    let mut effects = Effects::new();

    'chunks: for chunk in templates.chunks(options.chunk_size()) {
        for template in chunk {
            if options.is_cancelled() {
                warn!("Reminder run cancelled");
                report.cancelled = true;
                break 'chunks;
            }

            let rules = match ctx.persistence.list_reminders(template.id).await {
                Ok(rules) => rules,
                Err(e) => {
                    error!(template_id = template.id, error = %e, "Failed to load reminder rules");
                    report.failed += 1;
                    continue;
                }
            };

            for rule in &rules {
                report.rules += 1;
                match fire_rule(ctx, template, rule, now, today, &mut effects).await {
                    Ok(RuleOutcome::Fired { notifications }) => {
                        report.fired += 1;
                        report.notifications += notifications;
                    }
                    Ok(RuleOutcome::NotDue) => report.not_due += 1,
                    Ok(RuleOutcome::AlreadyFired) => report.already_fired += 1,
                    Err(e) => {
                        error!(
                            template_id = template.id,
                            rule_id = rule.id,
                            error = %e,
                            "Failed to evaluate reminder rule"
                        );
                        report.failed += 1;
                    }
                }
            }
        }
        tokio::task::yield_now().await;
    }

    info!(
        rules = report.rules,
        fired = report.fired,
        already_fired = report.already_fired,
        notifications = report.notifications,
        failed = report.failed,
        cancelled = report.cancelled,
        "Reminder run finished"
    );

    Ok((report, effects))
}

async fn fire_rule(
    ctx: &MaintenanceContext,
    template: &MaintenanceDefinition,
    rule: &ReminderRule,
    now: DateTime<Utc>,
    today: NaiveDate,
    effects: &mut Effects,
) -> Result<RuleOutcome> {
    let Some(span) = measurement::threshold_span(rule.measurement, rule.value) else {
        return Ok(RuleOutcome::NotDue);
    };

    let quantity = if rule.measurement.is_meter_based() {
        match ctx.resolve_reading(template).await? {
            Some(reading) => reading,
            None => return Ok(RuleOutcome::NotDue),
        }
    } else {
        elapsed_days(template.created_at, now)
    };

    let previous = rule.previous_value.unwrap_or(0);
    if !measurement::is_due(rule.measurement, rule.value, previous, quantity) {
        return Ok(RuleOutcome::NotDue);
    }

    let advanced = previous.saturating_add(span);
    if !ctx
        .persistence
        .advance_reminder(rule.id, advanced, today)
        .await?
    {
        debug!(rule_id = rule.id, %today, "Reminder already fired today");
        return Ok(RuleOutcome::AlreadyFired);
    }

    let recipients = match template.entity_id {
        Some(entity_id) => {
            ctx.assignments
                .entity_assignment_ids(entity_id, None)
                .await?
        }
        None => Vec::new(),
    };

    let body = format!(
        "Maintenance '{}' is due: {} {} reached",
        template.name, rule.value, rule.measurement
    );
    for &user_id in &recipients {
        effects.notify(user_id, body.clone(), Some(maintenance_link(template.id)));
    }
    effects.history(
        template.id,
        None,
        "reminder_fired",
        Some(format!("{} {}; next at {}", rule.value, rule.measurement, advanced)),
    );

    info!(
        template_id = template.id,
        rule_id = rule.id,
        previous_value = previous,
        advanced_to = advanced,
        recipients = recipients.len(),
        "Reminder fired"
    );

    Ok(RuleOutcome::Fired {
        notifications: recipients.len(),
    })
}

pub(crate) fn maintenance_link(definition_id: i64) -> String {
    format!("/maintenance/{definition_id}")
}

/// Reference point a fresh rule on `definition` starts from.
///
/// Calendar rules start from the days elapsed since the definition was
/// created. Meter rules start from the entity's latest reading, falling back
/// to the stored `current_reading`, then 0.
pub async fn reminder_baseline(
    ctx: &MaintenanceContext,
    definition: &MaintenanceDefinition,
    kind: Measurement,
) -> Result<i64> {
    baseline_for(
        ctx,
        definition.entity_id,
        definition.created_at,
        definition.current_reading,
        kind,
    )
    .await
}

async fn baseline_for(
    ctx: &MaintenanceContext,
    entity_id: Option<i64>,
    created_at: DateTime<Utc>,
    current_reading: Option<i64>,
    kind: Measurement,
) -> Result<i64> {
    if kind.is_calendar_based() {
        return Ok(elapsed_days(created_at, ctx.clock.now()));
    }
    let latest = match entity_id {
        Some(entity_id) => ctx.readings.latest_reading(entity_id).await?,
        None => None,
    };
    Ok(latest.or(current_reading).unwrap_or(0))
}

/// Outcome of [`upsert_pm_notification_reminder`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderUpsertOutcome {
    /// The rule on the requested definition.
    pub rule: ReminderRule,
    /// Template rules created or replaced from an Origin rule.
    pub propagated: usize,
    /// Templates whose rule could not be written.
    pub failed: usize,
}

/// Create or replace a reminder rule on a definition.
///
/// On an Origin the rule is also derived onto every Template, each with its
/// own baseline and a link back to the Origin rule.
pub async fn upsert_pm_notification_reminder(
    ctx: &MaintenanceContext,
    definition_id: i64,
    kind: Measurement,
    value: i64,
) -> Result<(ReminderUpsertOutcome, Effects)> {
    if kind == Measurement::Unset {
        return Err(CoreError::validation(
            "measurement",
            "a reminder needs a measurement",
        ));
    }
    if value <= 0 {
        return Err(CoreError::validation("value", "must be greater than zero"));
    }

    let definition = ctx
        .persistence
        .get_definition(definition_id)
        .await?
        .ok_or(CoreError::DefinitionNotFound { id: definition_id })?;
    if definition.kind == DefinitionKind::Copy {
        return Err(CoreError::InvalidDefinitionKind {
            id: definition_id,
            expected: DefinitionKind::Template,
            actual: DefinitionKind::Copy,
        });
    }

    let baseline = reminder_baseline(ctx, &definition, kind).await?;
    let rule = ctx
        .persistence
        .upsert_reminder(&ReminderUpsert {
            definition_id,
            measurement: kind,
            value,
            previous_value: Some(baseline),
            origin_id: None,
        })
        .await?;

    let mut outcome = ReminderUpsertOutcome {
        rule,
        propagated: 0,
        failed: 0,
    };

    if definition.kind == DefinitionKind::Origin {
        let templates = ctx
            .persistence
            .list_definitions(DefinitionKind::Template, Some(definition.id))
            .await?;
        for template in &templates {
            match derive_rule(ctx, template, &outcome.rule).await {
                Ok(_) => outcome.propagated += 1,
                Err(e) => {
                    error!(
                        origin_id = definition.id,
                        template_id = template.id,
                        error = %e,
                        "Failed to derive reminder rule onto template"
                    );
                    outcome.failed += 1;
                }
            }
        }
    }

    let mut effects = Effects::new();
    effects.history(
        definition.id,
        None,
        "reminder_updated",
        Some(format!("{value} {kind}")),
    );

    info!(
        definition_id,
        measurement = %kind,
        value,
        propagated = outcome.propagated,
        failed = outcome.failed,
        "Upserted notification reminder"
    );

    Ok((outcome, effects))
}

async fn derive_rule(
    ctx: &MaintenanceContext,
    template: &MaintenanceDefinition,
    origin_rule: &ReminderRule,
) -> Result<ReminderRule> {
    let baseline = reminder_baseline(ctx, template, origin_rule.measurement).await?;
    ctx.persistence
        .upsert_reminder(&ReminderUpsert {
            definition_id: template.id,
            measurement: origin_rule.measurement,
            value: origin_rule.value,
            previous_value: Some(baseline),
            origin_id: Some(origin_rule.id),
        })
        .await
}

/// Rules of an Origin as they should be written onto a Template that is
/// about to be created for `template`'s entity.
pub(crate) async fn plan_origin_rules(
    ctx: &MaintenanceContext,
    origin_id: i64,
    template: &NewDefinition,
) -> Result<Vec<PlannedReminder>> {
    let rules = ctx.persistence.list_reminders(origin_id).await?;
    let mut planned = Vec::with_capacity(rules.len());
    for rule in &rules {
        let baseline = baseline_for(
            ctx,
            template.entity_id,
            template.created_at,
            template.current_reading,
            rule.measurement,
        )
        .await?;
        planned.push(PlannedReminder {
            measurement: rule.measurement,
            value: rule.value,
            previous_value: Some(baseline),
            origin_id: Some(rule.id),
        });
    }
    Ok(planned)
}
