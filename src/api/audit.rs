// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::Auth,
    error::ApiError,
    state::AppState,
    storage::{AuditEvent, AuditRepository},
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQuery {
    /// Day to read, `YYYY-MM-DD` (UTC). Defaults to today.
    pub date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuditListResponse {
    pub date: NaiveDate,
    pub events: Vec<AuditEvent>,
    pub total: usize,
}

/// The owner's own audit events for one day.
#[utoipa::path(
    get,
    path = "/v1/audit",
    tag = "Audit",
    security(("bearer_auth" = [])),
    params(AuditQuery),
    responses(
        (status = 200, description = "Audit events", body = AuditListResponse),
        (status = 400, description = "Invalid date"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_audit_events(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditListResponse>, ApiError> {
    let date = match query.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| ApiError::bad_request("Invalid date format. Use YYYY-MM-DD."))?,
        None => Utc::now().date_naive(),
    };

    let events = AuditRepository::new(&state.db).search_by_user(&user.user_id, date)?;
    let total = events.len();
    Ok(Json(AuditListResponse {
        date,
        events,
        total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::keys::tests::user;
    use crate::state::test_support::test_state;
    use crate::storage::AuditEventType;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn returns_only_own_events() {
        let (state, _dir) = test_state();
        let repo = AuditRepository::new(&state.db);
        let own = AuditEvent::new(AuditEventType::ScheduleCreated).with_user("user_1");
        let events_day = own.timestamp.date_naive();
        repo.record(own);
        repo.record(AuditEvent::new(AuditEventType::ScheduleCreated).with_user("user_2"));

        let Json(response) = list_audit_events(
            Auth(user("user_1")),
            State(state),
            Query(AuditQuery {
                date: Some(events_day.format("%Y-%m-%d").to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.events[0].user_id.as_deref(), Some("user_1"));
    }

    #[tokio::test]
    async fn rejects_malformed_date() {
        let (state, _dir) = test_state();
        let err = list_audit_events(
            Auth(user("user_1")),
            State(state),
            Query(AuditQuery {
                date: Some("19-10-2026".into()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
