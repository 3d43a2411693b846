// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Trading schedule management.
//!
//! Schedules are created disabled. Enabling one makes it due on the next
//! trigger; the scheduler disables it again after too many consecutive
//! failures, and only the owner can re-enable it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    audit_log,
    auth::{Auth, AuthenticatedUser},
    error::ApiError,
    state::AppState,
    storage::{AuditEventType, OwnershipCheck, ScheduleRepository, StoredSchedule},
};

pub const MIN_INTERVAL_SECS: u64 = 60;
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;
pub const MAX_COINS: usize = 20;
pub const MAX_COIN_SYMBOL_LEN: usize = 20;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_ERROR_LIMIT: u32 = 100;
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleRequest {
    pub name: String,
    pub interval_seconds: u64,
    pub coins: Vec<String>,
    /// Consecutive failures before auto-disable. Defaults to 5.
    #[serde(default)]
    pub max_consecutive_errors: Option<u32>,
}

/// Partial update; omitted fields are unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScheduleRequest {
    pub name: Option<String>,
    pub interval_seconds: Option<u64>,
    pub coins: Option<Vec<String>>,
    pub max_consecutive_errors: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ScheduleListResponse {
    pub schedules: Vec<StoredSchedule>,
    pub total: usize,
}

// =============================================================================
// Validation
// =============================================================================

fn validate_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "name must be 1 to {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_interval(seconds: u64) -> Result<u64, ApiError> {
    if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&seconds) {
        return Err(ApiError::bad_request(format!(
            "intervalSeconds must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS}"
        )));
    }
    Ok(seconds)
}

/// Upper-case, de-duplicate (first occurrence wins) and bound the coin list.
fn validate_coins(coins: &[String]) -> Result<Vec<String>, ApiError> {
    let mut normalized: Vec<String> = Vec::with_capacity(coins.len());
    for coin in coins {
        let symbol = coin.trim().to_uppercase();
        let valid = !symbol.is_empty()
            && symbol.len() <= MAX_COIN_SYMBOL_LEN
            && symbol.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(ApiError::bad_request(format!("invalid coin symbol '{coin}'")));
        }
        if !normalized.contains(&symbol) {
            normalized.push(symbol);
        }
    }
    if normalized.is_empty() || normalized.len() > MAX_COINS {
        return Err(ApiError::bad_request(format!(
            "coins must list 1 to {MAX_COINS} symbols"
        )));
    }
    Ok(normalized)
}

fn validate_error_limit(limit: u32) -> Result<u32, ApiError> {
    if !(1..=MAX_ERROR_LIMIT).contains(&limit) {
        return Err(ApiError::bad_request(format!(
            "maxConsecutiveErrors must be between 1 and {MAX_ERROR_LIMIT}"
        )));
    }
    Ok(limit)
}

fn owned_schedule(
    state: &AppState,
    user: &AuthenticatedUser,
    schedule_id: &str,
) -> Result<StoredSchedule, ApiError> {
    Ok(ScheduleRepository::new(&state.db)
        .get(schedule_id)
        .verify_owner(user)?)
}

// =============================================================================
// Handlers
// =============================================================================

#[utoipa::path(
    post,
    path = "/v1/schedules",
    tag = "Schedules",
    security(("bearer_auth" = [])),
    request_body = CreateScheduleRequest,
    responses(
        (status = 201, description = "Schedule created (disabled)", body = StoredSchedule),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Name already used")
    )
)]
pub async fn create_schedule(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<StoredSchedule>), ApiError> {
    let schedule = StoredSchedule::new(
        &user.user_id,
        validate_name(&request.name)?,
        validate_interval(request.interval_seconds)?,
        validate_coins(&request.coins)?,
        validate_error_limit(
            request
                .max_consecutive_errors
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_ERRORS),
        )?,
        Utc::now(),
    );
    ScheduleRepository::new(&state.db).create(&schedule)?;

    audit_log!(&state.db, AuditEventType::ScheduleCreated, &user, "schedule", &schedule.id);
    Ok((StatusCode::CREATED, Json(schedule)))
}

#[utoipa::path(
    get,
    path = "/v1/schedules",
    tag = "Schedules",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Schedules", body = ScheduleListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_schedules(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<ScheduleListResponse>, ApiError> {
    let schedules = ScheduleRepository::new(&state.db).list_by_owner(&user.user_id)?;
    let total = schedules.len();
    Ok(Json(ScheduleListResponse { schedules, total }))
}

#[utoipa::path(
    get,
    path = "/v1/schedules/{schedule_id}",
    tag = "Schedules",
    security(("bearer_auth" = [])),
    params(("schedule_id" = String, Path, description = "Schedule ID")),
    responses(
        (status = 200, description = "Schedule", body = StoredSchedule),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Schedule not found")
    )
)]
pub async fn get_schedule(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(schedule_id): Path<String>,
) -> Result<Json<StoredSchedule>, ApiError> {
    Ok(Json(owned_schedule(&state, &user, &schedule_id)?))
}

#[utoipa::path(
    put,
    path = "/v1/schedules/{schedule_id}",
    tag = "Schedules",
    security(("bearer_auth" = [])),
    params(("schedule_id" = String, Path, description = "Schedule ID")),
    request_body = UpdateScheduleRequest,
    responses(
        (status = 200, description = "Schedule updated", body = StoredSchedule),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Schedule not found"),
        (status = 409, description = "Name already used")
    )
)]
pub async fn update_schedule(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(schedule_id): Path<String>,
    Json(request): Json<UpdateScheduleRequest>,
) -> Result<Json<StoredSchedule>, ApiError> {
    owned_schedule(&state, &user, &schedule_id)?;

    let name = request.name.as_deref().map(validate_name).transpose()?;
    let interval = request.interval_seconds.map(validate_interval).transpose()?;
    let coins = request.coins.as_deref().map(validate_coins).transpose()?;
    let error_limit = request
        .max_consecutive_errors
        .map(validate_error_limit)
        .transpose()?;

    let updated = ScheduleRepository::new(&state.db).update(&schedule_id, Utc::now(), |s| {
        if let Some(name) = name {
            s.name = name;
        }
        if let Some(interval) = interval {
            s.interval_seconds = interval;
        }
        if let Some(coins) = coins {
            s.coins = coins;
        }
        if let Some(limit) = error_limit {
            s.max_consecutive_errors = limit;
        }
    })?;

    audit_log!(&state.db, AuditEventType::ScheduleUpdated, &user, "schedule", &schedule_id);
    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/v1/schedules/{schedule_id}",
    tag = "Schedules",
    security(("bearer_auth" = [])),
    params(("schedule_id" = String, Path, description = "Schedule ID")),
    responses(
        (status = 204, description = "Schedule deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Schedule not found")
    )
)]
pub async fn delete_schedule(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(schedule_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    owned_schedule(&state, &user, &schedule_id)?;
    ScheduleRepository::new(&state.db).delete(&schedule_id)?;

    audit_log!(&state.db, AuditEventType::ScheduleDeleted, &user, "schedule", &schedule_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Enable a schedule. Clears the error streak and makes it due immediately.
#[utoipa::path(
    post,
    path = "/v1/schedules/{schedule_id}/enable",
    tag = "Schedules",
    security(("bearer_auth" = [])),
    params(("schedule_id" = String, Path, description = "Schedule ID")),
    responses(
        (status = 200, description = "Schedule enabled", body = StoredSchedule),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Schedule not found")
    )
)]
pub async fn enable_schedule(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(schedule_id): Path<String>,
) -> Result<Json<StoredSchedule>, ApiError> {
    owned_schedule(&state, &user, &schedule_id)?;
    let schedule = ScheduleRepository::new(&state.db).enable(&schedule_id, Utc::now())?;

    audit_log!(&state.db, AuditEventType::ScheduleEnabled, &user, "schedule", &schedule_id);
    Ok(Json(schedule))
}

#[utoipa::path(
    post,
    path = "/v1/schedules/{schedule_id}/disable",
    tag = "Schedules",
    security(("bearer_auth" = [])),
    params(("schedule_id" = String, Path, description = "Schedule ID")),
    responses(
        (status = 200, description = "Schedule disabled", body = StoredSchedule),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Schedule not found")
    )
)]
pub async fn disable_schedule(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(schedule_id): Path<String>,
) -> Result<Json<StoredSchedule>, ApiError> {
    owned_schedule(&state, &user, &schedule_id)?;
    let schedule = ScheduleRepository::new(&state.db).disable(&schedule_id, Utc::now())?;

    audit_log!(&state.db, AuditEventType::ScheduleDisabled, &user, "schedule", &schedule_id);
    Ok(Json(schedule))
}
