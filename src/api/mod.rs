// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::AuthenticatedUser,
    custody::{CredentialStatus, CredentialTier, EncryptedSecret},
    exchange::{TimeInForce, TradeResult},
    scheduler::{BatchReport, CycleReport, RunSummary, ScheduleOutcome},
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, KeyRecordSummary, ScheduleClaim, SessionSummary, StoredSchedule,
    },
};

pub mod audit;
pub mod health;
pub mod keys;
pub mod scheduler;
pub mod schedules;
pub mod sessions;
pub mod trades;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/scheduler/run", post(scheduler::run_scheduler))
        .route(
            "/keys",
            get(keys::get_key).put(keys::put_key).delete(keys::delete_key),
        )
        .route(
            "/keys/persistent",
            put(keys::enable_persistent).delete(keys::disable_persistent),
        )
        .route("/credentials/status", get(keys::credential_status))
        .route(
            "/sessions",
            get(sessions::list_sessions)
                .post(sessions::create_session)
                .delete(sessions::revoke_all_sessions),
        )
        .route("/sessions/{session_id}", delete(sessions::revoke_session))
        .route(
            "/schedules",
            get(schedules::list_schedules).post(schedules::create_schedule),
        )
        .route(
            "/schedules/{schedule_id}",
            get(schedules::get_schedule)
                .put(schedules::update_schedule)
                .delete(schedules::delete_schedule),
        )
        .route(
            "/schedules/{schedule_id}/enable",
            post(schedules::enable_schedule),
        )
        .route(
            "/schedules/{schedule_id}/disable",
            post(schedules::disable_schedule),
        )
        .route("/trades", post(trades::place_trade))
        .route("/audit", get(audit::list_audit_events));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "scheduler_secret",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-scheduler-secret"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        scheduler::run_scheduler,
        keys::get_key,
        keys::put_key,
        keys::delete_key,
        keys::enable_persistent,
        keys::disable_persistent,
        keys::credential_status,
        sessions::create_session,
        sessions::list_sessions,
        sessions::revoke_all_sessions,
        sessions::revoke_session,
        schedules::create_schedule,
        schedules::list_schedules,
        schedules::get_schedule,
        schedules::update_schedule,
        schedules::delete_schedule,
        schedules::enable_schedule,
        schedules::disable_schedule,
        trades::place_trade,
        audit::list_audit_events
    ),
    components(
        schemas(
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks,
            BatchReport,
            RunSummary,
            ScheduleOutcome,
            CycleReport,
            keys::StoreKeyRequest,
            keys::PasswordRequest,
            EncryptedSecret,
            KeyRecordSummary,
            CredentialStatus,
            CredentialTier,
            sessions::CreateSessionRequest,
            sessions::SessionListResponse,
            sessions::RevokeAllResponse,
            SessionSummary,
            schedules::CreateScheduleRequest,
            schedules::UpdateScheduleRequest,
            schedules::ScheduleListResponse,
            StoredSchedule,
            ScheduleClaim,
            trades::TradeRequest,
            trades::TradeResponse,
            trades::CredentialSource,
            TradeResult,
            TimeInForce,
            audit::AuditListResponse,
            AuditEvent,
            AuditEventType,
            AuthenticatedUser
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Scheduler", description = "Timer-driven schedule execution"),
        (name = "Keys", description = "Encrypted exchange keys and persistent credentials"),
        (name = "Sessions", description = "Time-boxed execution sessions"),
        (name = "Schedules", description = "Autonomous trading schedules"),
        (name = "Trading", description = "Manual order placement"),
        (name = "Audit", description = "Owner audit trail")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{owner_token, test_state, TRIGGER_SECRET};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn owner_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", owner_token("user_1")));
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[tokio::test]
    async fn health_is_public_and_sets_request_id() {
        let (state, _dir) = test_state();
        let app = router(state);
        let response = app
            .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn owner_routes_require_token() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, body) = send(
            &app,
            Request::get("/v1/schedules").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "missing_auth_header");
    }

    #[tokio::test]
    async fn schedule_crud_over_http() {
        let (state, _dir) = test_state();
        let app = router(state);

        let (status, created) = send(
            &app,
            owner_request(
                "POST",
                "/v1/schedules",
                Some(serde_json::json!({
                    "name": "majors",
                    "intervalSeconds": 300,
                    "coins": ["btc", "eth"]
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["enabled"], false);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, enabled) =
            send(&app, owner_request("POST", &format!("/v1/schedules/{id}/enable"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(enabled["enabled"], true);

        let (status, list) = send(&app, owner_request("GET", "/v1/schedules", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);

        let (status, _) =
            send(&app, owner_request("DELETE", &format!("/v1/schedules/{id}"), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn scheduler_trigger_rejects_owner_token() {
        let (state, _dir) = test_state();
        let app = router(state);

        let (status, body) = send(&app, owner_request("POST", "/v1/scheduler/run", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "invalid_trigger_secret");

        let (status, body) = send(
            &app,
            Request::post("/v1/scheduler/run")
                .header("x-scheduler-secret", TRIGGER_SECRET)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["due"], 0);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let (state, _dir) = test_state();
        let app = router(state);
        let (status, doc) = send(
            &app,
            Request::get("/api-doc/openapi.json").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(doc["paths"]["/v1/schedules/{schedule_id}/enable"].is_object());
        assert!(doc["components"]["securitySchemes"]["scheduler_secret"].is_object());
    }
}
