// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Scheduler trigger endpoint.
//!
//! Called by an external timer. Authenticated with the shared trigger secret
//! only; owner tokens are not accepted here.

use axum::{extract::State, Json};
use serde_json::json;
use tracing::info;

use crate::{
    auth::SchedulerTrigger,
    error::ApiError,
    scheduler::BatchReport,
    state::AppState,
    storage::{AuditEvent, AuditEventType, AuditRepository},
};

/// Run every due schedule once.
///
/// Returns after the whole batch finished. Individual schedule failures are
/// reported in the body and never fail the request.
#[utoipa::path(
    post,
    path = "/v1/scheduler/run",
    tag = "Scheduler",
    security(("scheduler_secret" = [])),
    responses(
        (status = 200, description = "Batch completed", body = BatchReport),
        (status = 401, description = "Missing or wrong trigger secret"),
        (status = 503, description = "Trigger secret not configured")
    )
)]
pub async fn run_scheduler(
    _trigger: SchedulerTrigger,
    State(state): State<AppState>,
) -> Result<Json<BatchReport>, ApiError> {
    info!("Scheduler trigger accepted");
    let report = state.orchestrator.run_due().await?;

    AuditRepository::new(&state.db).record(
        AuditEvent::new(AuditEventType::SchedulerTriggered).with_details(json!({
            "due": report.due,
            "succeeded": report.succeeded,
            "failed": report.failed,
            "auto_disabled": report.auto_disabled,
            "skipped": report.skipped,
        })),
    );

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ScheduleRepository, StoredSchedule};
    use chrono::Utc;

    #[tokio::test]
    async fn empty_batch_reports_zero() {
        let (state, _dir) = crate::state::test_support::test_state();
        let Json(report) = run_scheduler(SchedulerTrigger, State(state)).await.unwrap();
        assert_eq!(report.due, 0);
        assert!(report.runs.is_empty());
    }

    #[tokio::test]
    async fn due_schedule_without_credential_is_recorded_as_failure() {
        let (state, _dir) = crate::state::test_support::test_state();
        let mut schedule =
            StoredSchedule::new("user_1", "btc", 60, vec!["BTC".into()], 5, Utc::now());
        schedule.enabled = true;
        ScheduleRepository::new(&state.db).create(&schedule).unwrap();

        let Json(report) = run_scheduler(SchedulerTrigger, State(state.clone())).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.failed, 1);

        let stored = ScheduleRepository::new(&state.db).get(&schedule.id).unwrap();
        assert_eq!(stored.consecutive_errors, 1);
        assert!(stored.last_error.is_some());
    }
}
