// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The schedule control loop.
//!
//! One call to [`ScheduleOrchestrator::run_due`] is one batch:
//!
//! 1. read every due schedule in a single transaction
//! 2. claim each one (version compare-and-set, leased claim)
//! 3. resolve the owner's execution password
//! 4. run the cycle under a timeout
//! 5. record success or error against the schedule, releasing the claim
//!
//! Runs proceed concurrently up to `max_concurrency`. A failing run only
//! ever affects its own schedule. The claim lease covers the run timeout
//! plus [`CLAIM_GRACE`], so a run outlasting its interval is never started
//! twice. Database work and key derivation happen on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::executor::{CycleError, CycleExecutor, CycleReport, CycleRequest};
use crate::custody::SessionCustodian;
use crate::storage::{
    run_blocking, AuditEvent, AuditEventType, AuditRepository, CustodyDatabase, DbError,
    DueSchedule, ScheduleRepository,
};
use crate::trading::{TradeAuthority, TradeService};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(120);
/// Claim lifetime beyond the run timeout, for recording the outcome.
pub const CLAIM_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    pub run_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Db(#[from] DbError),
}

/// What happened to one schedule in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Succeeded,
    Failed,
    /// Failed, and this failure reached the consecutive-error limit.
    AutoDisabled,
    /// Another batch claimed it first, or it stopped being due.
    Skipped,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub schedule_id: String,
    pub owner: String,
    pub outcome: ScheduleOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CycleReport>,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub auto_disabled: usize,
    pub skipped: usize,
    pub runs: Vec<RunSummary>,
}

impl BatchReport {
    fn from_runs(due: usize, runs: Vec<RunSummary>) -> Self {
        let count = |outcome| runs.iter().filter(|r| r.outcome == outcome).count();
        Self {
            due,
            succeeded: count(ScheduleOutcome::Succeeded),
            failed: count(ScheduleOutcome::Failed),
            auto_disabled: count(ScheduleOutcome::AutoDisabled),
            skipped: count(ScheduleOutcome::Skipped),
            runs,
        }
    }
}

pub struct ScheduleOrchestrator {
    db: Arc<CustodyDatabase>,
    custodian: Arc<SessionCustodian>,
    trades: Arc<TradeService>,
    executor: Arc<dyn CycleExecutor>,
    config: SchedulerConfig,
}

impl ScheduleOrchestrator {
    pub fn new(
        db: Arc<CustodyDatabase>,
        custodian: Arc<SessionCustodian>,
        trades: Arc<TradeService>,
        executor: Arc<dyn CycleExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            custodian,
            trades,
            executor,
            config,
        }
    }

    async fn with_schedules<T, F>(&self, op: F) -> Result<T, DbError>
    where
        F: FnOnce(&ScheduleRepository<'_>) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        run_blocking(move || op(&ScheduleRepository::new(&db))).await
    }

    /// Run every schedule that is due now.
    pub async fn run_due(&self) -> Result<BatchReport, SchedulerError> {
        let due = self
            .with_schedules(|repo| repo.get_due_schedules(Utc::now()))
            .await?;
        let total = due.len();
        if total == 0 {
            return Ok(BatchReport::default());
        }
        info!(due = total, "Scheduler batch starting");

        let runs: Vec<RunSummary> = stream::iter(due)
            .map(|schedule| self.run_one(schedule))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport::from_runs(total, runs);
        info!(
            due = report.due,
            succeeded = report.succeeded,
            failed = report.failed,
            auto_disabled = report.auto_disabled,
            skipped = report.skipped,
            "Scheduler batch finished"
        );
        Ok(report)
    }

    async fn run_one(&self, due: DueSchedule) -> RunSummary {
        let mut summary = RunSummary {
            schedule_id: due.schedule_id.clone(),
            owner: due.owner_user_id.clone(),
            outcome: ScheduleOutcome::Skipped,
            error: None,
            report: None,
        };

        let lease = self.config.run_timeout.saturating_add(CLAIM_GRACE);
        let schedule_id = due.schedule_id.clone();
        let version = due.version;
        let claimed = self
            .with_schedules(move |repo| repo.claim(&schedule_id, version, lease, Utc::now()))
            .await;
        let claim_id = match claimed {
            Ok(Some(schedule)) => schedule.claim.map(|claim| claim.claim_id),
            Ok(None) => {
                info!(schedule_id = %due.schedule_id, "Schedule already claimed, skipping");
                return summary;
            }
            Err(e) => {
                error!(schedule_id = %due.schedule_id, error = %e, "Failed to claim schedule");
                summary.error = Some(e.to_string());
                return summary;
            }
        };

        let result = match tokio::time::timeout(self.config.run_timeout, self.execute_cycle(&due)).await
        {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "run timed out after {}s",
                self.config.run_timeout.as_secs()
            )),
        };

        let now = Utc::now();
        match result {
            Ok(report) => {
                let schedule_id = due.schedule_id.clone();
                let held = claim_id.clone();
                let recorded = self
                    .with_schedules(move |repo| repo.record_success(&schedule_id, held.as_deref(), now))
                    .await;
                if let Err(e) = recorded {
                    log_record_failure(&due, &e, "success");
                }
                self.audit(&due, AuditEvent::new(AuditEventType::ScheduleRunSucceeded).with_details(
                    json!({
                        "orders_attempted": report.orders_attempted,
                        "orders_succeeded": report.orders_succeeded,
                    }),
                ));
                info!(schedule_id = %due.schedule_id, owner = %due.owner_user_id, "Schedule run succeeded");
                summary.outcome = ScheduleOutcome::Succeeded;
                summary.report = Some(report);
            }
            Err(message) => {
                warn!(schedule_id = %due.schedule_id, owner = %due.owner_user_id, error = %message, "Schedule run failed");
                summary.outcome = ScheduleOutcome::Failed;
                self.audit(&due, AuditEvent::new(AuditEventType::ScheduleRunFailed).failed(&message));

                let schedule_id = due.schedule_id.clone();
                let held = claim_id.clone();
                let error_message = message.clone();
                let recorded = self
                    .with_schedules(move |repo| {
                        repo.record_error(&schedule_id, held.as_deref(), &error_message, now)
                    })
                    .await;
                match recorded {
                    Ok(record) if record.auto_disabled => {
                        warn!(
                            schedule_id = %due.schedule_id,
                            consecutive_errors = record.schedule.consecutive_errors,
                            "Schedule auto-disabled after repeated failures"
                        );
                        self.audit(&due, AuditEvent::new(AuditEventType::ScheduleAutoDisabled).with_details(
                            json!({ "consecutive_errors": record.schedule.consecutive_errors }),
                        ));
                        summary.outcome = ScheduleOutcome::AutoDisabled;
                    }
                    Ok(_) => {}
                    Err(e) => log_record_failure(&due, &e, "error"),
                }
                summary.error = Some(message);
            }
        }
        summary
    }

    /// Resolve credentials and run the cycle. No password means no run.
    async fn execute_cycle(&self, due: &DueSchedule) -> Result<CycleReport, CycleError> {
        let owner = due.owner_user_id.clone();
        let resolution = self
            .custodian
            .blocking(move |custodian| custodian.get_execution_password(&owner))
            .await
            .map_err(|e| CycleError::NoCredential(e.to_string()))?;
        let tier = resolution.tier();
        let password = resolution
            .into_password()
            .map_err(|reason| CycleError::NoCredential(reason.to_string()))?;
        info!(schedule_id = %due.schedule_id, tier = ?tier, "Execution credential resolved");

        let authority = TradeAuthority::new(&self.trades, &due.owner_user_id, &password);
        self.executor
            .execute(CycleRequest {
                schedule_id: &due.schedule_id,
                owner: &due.owner_user_id,
                coins: &due.coins,
                authority: Some(authority),
            })
            .await
    }

    fn audit(&self, due: &DueSchedule, event: AuditEvent) {
        AuditRepository::new(&self.db).record(
            event
                .with_user(&due.owner_user_id)
                .with_resource("schedule", &due.schedule_id),
        );
    }
}

fn log_record_failure(due: &DueSchedule, err: &DbError, outcome: &str) {
    match err {
        DbError::Conflict(_) => {
            warn!(schedule_id = %due.schedule_id, outcome, "Schedule claim lost, outcome discarded");
        }
        other => {
            error!(schedule_id = %due.schedule_id, outcome, error = %other, "Failed to record schedule outcome");
        }
    }
}
