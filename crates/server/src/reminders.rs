//! Periodic nudges for requests that sit too long in a pending stage.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use cabflow_core::config::{RemindersConfig, MAX_REMINDER_INTERVAL_MINUTES};
use cabflow_core::domain::booking::RequestStatus;
use cabflow_core::errors::ApplicationError;
use cabflow_db::repositories::OverdueQuery;
use cabflow_notify::NotificationKind;

use crate::state::AppState;
use crate::workflow;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReminderSummary {
    pub scanned: usize,
    pub manager_reminders: usize,
    pub admin_reminders: usize,
    pub failed: usize,
}

/// Sends one reminder per overdue request. A reminder counts against the
/// request's limit only when at least one channel delivered it.
pub async fn run_sweep(
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<ReminderSummary, ApplicationError> {
    let query = overdue_query(&state.settings.reminders, now)?;
    let overdue = state.repos.requests.list_overdue(query).await?;

    let mut summary = ReminderSummary { scanned: overdue.len(), ..ReminderSummary::default() };
    for request in overdue {
        let delivered = match request.status {
            RequestStatus::PendingManagerApproval => {
                let decision_url = workflow::issue_decision_link(state, &request, now).await;
                let recipients = vec![workflow::approver_recipient(&request)];
                let delivered = workflow::send(
                    state,
                    &request,
                    NotificationKind::Reminder,
                    recipients,
                    decision_url,
                    now,
                )
                .await;
                if delivered > 0 {
                    summary.manager_reminders += 1;
                }
                delivered
            }
            RequestStatus::PendingAdminApproval => {
                let recipients = workflow::admin_team_recipients(state);
                let delivered = workflow::send(
                    state,
                    &request,
                    NotificationKind::Reminder,
                    recipients,
                    None,
                    now,
                )
                .await;
                if delivered > 0 {
                    summary.admin_reminders += 1;
                }
                delivered
            }
            _ => continue,
        };

        if delivered == 0 {
            summary.failed += 1;
            continue;
        }
        if let Err(error) = state.repos.requests.record_reminder(&request.id, now).await {
            summary.failed += 1;
            warn!(
                event_name = "reminders.record.failed",
                reference_id = %request.id,
                error = %error,
                "reminder sent but count not recorded"
            );
        }
    }

    info!(
        event_name = "reminders.sweep.completed",
        scanned = summary.scanned,
        manager_reminders = summary.manager_reminders,
        admin_reminders = summary.admin_reminders,
        failed = summary.failed,
        "reminder sweep completed"
    );
    Ok(summary)
}

fn overdue_query(
    settings: &RemindersConfig,
    now: DateTime<Utc>,
) -> Result<OverdueQuery, ApplicationError> {
    let before = |amount: u64, to_delta: fn(i64) -> Option<Duration>, key: &str| {
        i64::try_from(amount)
            .ok()
            .and_then(to_delta)
            .and_then(|delta| now.checked_sub_signed(delta))
            .ok_or_else(|| {
                ApplicationError::Configuration(format!("reminders.{key} {amount} is out of range"))
            })
    };

    Ok(OverdueQuery {
        stage_entered_before: before(
            settings.overdue_after_hours,
            Duration::try_hours,
            "overdue_after_hours",
        )?,
        last_reminder_before: before(
            settings.interval_minutes,
            Duration::try_minutes,
            "interval_minutes",
        )?,
        max_reminders: settings.max_reminders,
    })
}

/// Runs [`run_sweep`] on the configured interval until the process exits.
pub fn spawn(state: AppState) -> Option<tokio::task::JoinHandle<()>> {
    let settings = state.settings.reminders.clone();
    if !settings.enabled {
        info!(event_name = "reminders.disabled", "reminder job disabled");
        return None;
    }

    let minutes = settings.interval_minutes.clamp(1, MAX_REMINDER_INTERVAL_MINUTES);
    let period = StdDuration::from_secs(minutes * 60);
    info!(
        event_name = "reminders.started",
        interval_minutes = settings.interval_minutes,
        overdue_after_hours = settings.overdue_after_hours,
        max_reminders = settings.max_reminders,
        "reminder job started"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(error) = run_sweep(&state, Utc::now()).await {
                error!(
                    event_name = "reminders.sweep.failed",
                    error = %error,
                    "reminder sweep failed"
                );
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use cabflow_core::domain::account::Role;
    use cabflow_core::domain::booking::ReferenceId;
    use cabflow_core::errors::ApplicationError;

    use super::run_sweep;
    use crate::state::{AppState, WorkflowSettings};
    use crate::test_support::{actor, harness, trip};
    use crate::workflow;

    async fn submit_at(
        state: &AppState,
        employee: &str,
        role: Role,
        hours_ago: i64,
    ) -> ReferenceId {
        let at = Utc::now() - Duration::hours(hours_ago);
        workflow::submit(state, &actor(employee, role), trip(at), at).await.expect("submit").id
    }

    #[tokio::test]
    async fn overdue_manager_stage_gets_a_fresh_decision_link() {
        let harness = harness().await;
        let state = harness.state.clone();
        let overdue = submit_at(&state, "E1001", Role::Employee, 5).await;
        submit_at(&state, "E1001", Role::Employee, 1).await;
        let emails_before = harness.mailer.sent().len();

        let summary = run_sweep(&state, Utc::now()).await.expect("sweep");
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.manager_reminders, 1);
        assert_eq!(summary.failed, 0);

        let sent = harness.mailer.sent();
        let reminder = sent.last().expect("reminder email");
        assert_eq!(sent.len(), emails_before + 1);
        assert_eq!(reminder.to, vec!["ravi.kumar@example.com".to_string()]);
        assert!(reminder.subject.contains(&overdue.0));
        assert!(reminder.html_body.contains("Review and decide"));

        let stored = workflow::load(&state, &overdue).await.expect("load");
        assert_eq!(stored.reminder_count, 1);
        assert!(stored.last_reminder_at.is_some());
    }

    #[tokio::test]
    async fn reminders_respect_interval_and_limit() {
        let harness = harness().await;
        let state = harness.state.clone();
        submit_at(&state, "E2001", Role::Manager, 10).await;

        let now = Utc::now();
        let first = run_sweep(&state, now).await.expect("sweep");
        assert_eq!(first.admin_reminders, 1);

        let too_soon = run_sweep(&state, now + Duration::minutes(5)).await.expect("sweep");
        assert_eq!(too_soon.scanned, 0);

        run_sweep(&state, now + Duration::minutes(31)).await.expect("sweep");
        run_sweep(&state, now + Duration::minutes(62)).await.expect("sweep");
        let exhausted = run_sweep(&state, now + Duration::minutes(93)).await.expect("sweep");
        assert_eq!(exhausted.scanned, 0);
    }

    #[tokio::test]
    async fn out_of_range_cadence_fails_the_sweep_instead_of_panicking() {
        let harness = harness().await;
        let mut state = harness.state.clone();
        let mut settings = WorkflowSettings::clone(&state.settings);
        settings.reminders.overdue_after_hours = 10_000_000_000_000;
        state.settings = Arc::new(settings);

        let error = run_sweep(&state, Utc::now()).await.expect_err("sweep should fail");
        assert!(matches!(error, ApplicationError::Configuration(ref message)
            if message.contains("reminders.overdue_after_hours")));

        let mut settings = WorkflowSettings::clone(&state.settings);
        settings.reminders.overdue_after_hours = 4;
        settings.reminders.interval_minutes = u64::MAX;
        state.settings = Arc::new(settings);
        let error = run_sweep(&state, Utc::now()).await.expect_err("sweep should fail");
        assert!(error.to_string().contains("reminders.interval_minutes"));
    }
}
