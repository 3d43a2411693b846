// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Execution session endpoints (Tier B).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    audit_log,
    auth::Auth,
    custody::{ExecutionPassword, DEFAULT_SESSION_TTL_SECS},
    error::ApiError,
    state::AppState,
    storage::{AuditEventType, OwnershipCheck, SessionRepository, SessionSummary},
};

/// Open a session that lets scheduled runs use the password until it expires.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[schema(value_type = String)]
    pub password: ExecutionPassword,
    /// Lifetime in seconds, 300..=604800. Defaults to 24 hours.
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokeAllResponse {
    pub revoked: usize,
}

#[utoipa::path(
    post,
    path = "/v1/sessions",
    tag = "Sessions",
    security(("bearer_auth" = [])),
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionSummary),
        (status = 400, description = "TTL out of range"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Password does not unlock the key"),
        (status = 404, description = "No key stored")
    )
)]
pub async fn create_session(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionSummary>), ApiError> {
    let ttl_secs = request.ttl_seconds.unwrap_or(DEFAULT_SESSION_TTL_SECS);
    let ttl = Duration::try_seconds(ttl_secs)
        .ok_or_else(|| ApiError::bad_request("ttlSeconds out of range"))?;

    let owner = user.user_id.clone();
    let session = state
        .custodian
        .blocking(move |custodian| custodian.create_session(&owner, &request.password, ttl))
        .await?;

    audit_log!(&state.db, AuditEventType::SessionCreated, &user, "session", &session.id);
    Ok((StatusCode::CREATED, Json(SessionSummary::from(&session))))
}

/// List the owner's sessions, newest first. Tokens are never returned.
#[utoipa::path(
    get,
    path = "/v1/sessions",
    tag = "Sessions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sessions", body = SessionListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_sessions(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions: Vec<SessionSummary> = state
        .custodian
        .list_sessions(&user.user_id)?
        .iter()
        .map(SessionSummary::from)
        .collect();
    let total = sessions.len();
    Ok(Json(SessionListResponse { sessions, total }))
}

#[utoipa::path(
    delete,
    path = "/v1/sessions",
    tag = "Sessions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All sessions revoked", body = RevokeAllResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn revoke_all_sessions(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<RevokeAllResponse>, ApiError> {
    let revoked = state.custodian.revoke_all_sessions(&user.user_id)?;
    audit_log!(&state.db, AuditEventType::SessionsRevokedAll, &user);
    Ok(Json(RevokeAllResponse { revoked }))
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{session_id}",
    tag = "Sessions",
    security(("bearer_auth" = [])),
    params(
        ("session_id" = String, Path, description = "Session ID")
    ),
    responses(
        (status = 200, description = "Session revoked", body = SessionSummary),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session already revoked")
    )
)]
pub async fn revoke_session(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    SessionRepository::new(&state.db)
        .get(&session_id)
        .verify_owner(&user)?;

    let session = state.custodian.revoke_session(&session_id)?;
    audit_log!(&state.db, AuditEventType::SessionRevoked, &user, "session", &session_id);
    Ok(Json(SessionSummary::from(&session)))
}
