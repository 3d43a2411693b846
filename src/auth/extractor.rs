// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for owners and the scheduler trigger.
//!
//! Use the `Auth` extractor in handlers to require an owner:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```
//!
//! The trigger endpoint uses [`SchedulerTrigger`] instead; it accepts only
//! the configured shared secret and never an owner token.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, Algorithm, Validation};
use sha2::Sha256;
use tracing::warn;

use super::{AuthError, AuthenticatedUser, OwnerClaims};
use crate::state::{AppState, AuthConfig};
use crate::storage::{AuditEvent, AuditEventType, AuditRepository};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Header carrying the scheduler trigger secret.
pub const SCHEDULER_SECRET_HEADER: &str = "x-scheduler-secret";

/// HMAC key used only to make the secret comparison constant-time.
const TRIGGER_COMPARE_KEY: &[u8] = b"autotrader-scheduler-trigger";

type HmacSha256 = Hmac<Sha256>;

fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
    value
        .strip_prefix("Bearer ")
        .map(Some)
        .ok_or(AuthError::InvalidAuthHeader)
}

// =============================================================================
// Owner authentication
// =============================================================================

/// Extractor for authenticated owners.
///
/// Validates an HS256 bearer token from the Authorization header.
///
/// # Example
///
/// ```rust,ignore
/// async fn list_schedules(
///     Auth(user): Auth,
///     State(state): State<AppState>,
/// ) -> Result<Json<Vec<StoredSchedule>>, ApiError> {
///     // user.user_id contains the owner's ID
/// }
/// ```
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?.ok_or(AuthError::MissingAuthHeader)?;
        let user = verify_owner_token(token, &state.auth_config)?;
        Ok(Auth(user))
    }
}

/// Verify an owner token and extract the owner.
pub fn verify_owner_token(token: &str, config: &AuthConfig) -> Result<AuthenticatedUser, AuthError> {
    let Some(key) = &config.owner_jwt_key else {
        return Err(AuthError::OwnerAuthNotConfigured);
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = CLOCK_SKEW_LEEWAY;
    match &config.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    let token_data = decode::<OwnerClaims>(token, key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        jsonwebtoken::errors::ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        jsonwebtoken::errors::ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
        _ => AuthError::MalformedToken,
    })?;

    Ok(token_data.claims.into())
}

// =============================================================================
// Scheduler trigger
// =============================================================================

/// Extractor guarding the scheduler trigger.
///
/// Accepts the secret from `x-scheduler-secret` or `Authorization: Bearer`.
/// Without a configured secret every request is rejected.
pub struct SchedulerTrigger;

impl FromRequestParts<AppState> for SchedulerTrigger {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.auth_config.scheduler_secret else {
            warn!("Scheduler trigger called but no trigger secret is configured");
            return Err(AuthError::TriggerNotConfigured);
        };

        let presented = match parts.headers.get(SCHEDULER_SECRET_HEADER) {
            Some(value) => Some(value.to_str().map_err(|_| AuthError::InvalidAuthHeader)?),
            None => bearer_token(&parts.headers)?,
        };
        let Some(presented) = presented else {
            return Err(AuthError::MissingAuthHeader);
        };

        if !secrets_match(expected.as_str(), presented) {
            warn!("Scheduler trigger rejected: wrong secret");
            AuditRepository::new(&state.db).record(
                AuditEvent::new(AuditEventType::AuthFailure)
                    .with_resource("scheduler", "trigger")
                    .failed("invalid trigger secret"),
            );
            return Err(AuthError::InvalidTriggerSecret);
        }
        Ok(SchedulerTrigger)
    }
}

fn tag(value: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(TRIGGER_COMPARE_KEY).ok()?;
    mac.update(value.as_bytes());
    Some(mac)
}

/// Constant-time comparison independent of where the inputs first differ.
pub(crate) fn secrets_match(expected: &str, presented: &str) -> bool {
    match (tag(expected), tag(presented)) {
        (Some(expected), Some(presented)) => {
            presented.verify_slice(&expected.finalize().into_bytes()).is_ok()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{owner_token, test_state, JWT_SECRET, TRIGGER_SECRET};
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/v1/test");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn token_with(exp_offset: i64, secret: &str, aud: Option<&str>) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = OwnerClaims {
            sub: "user_1".into(),
            exp: now + exp_offset,
            iat: now,
            sid: Some("sess_123".into()),
            aud: aud.map(|a| serde_json::Value::String(a.into())),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn auth_extractor_accepts_valid_token() {
        let (state, _dir) = test_state();
        let token = owner_token("user_1");
        let mut parts = parts(&[("authorization", &format!("Bearer {token}"))]);

        let Auth(user) = Auth::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user.user_id, "user_1");
    }

    #[tokio::test]
    async fn auth_extractor_rejects_missing_or_malformed_header() {
        let (state, _dir) = test_state();

        let mut missing = parts(&[]);
        assert!(matches!(
            Auth::from_request_parts(&mut missing, &state).await,
            Err(AuthError::MissingAuthHeader)
        ));

        let mut basic = parts(&[("authorization", "Basic dXNlcjpwYXNz")]);
        assert!(matches!(
            Auth::from_request_parts(&mut basic, &state).await,
            Err(AuthError::InvalidAuthHeader)
        ));
    }

    #[test]
    fn token_verification_errors() {
        let config = AuthConfig::new(Some(JWT_SECRET), None, None);

        let expired = token_with(-3600, JWT_SECRET, None);
        assert!(matches!(verify_owner_token(&expired, &config), Err(AuthError::TokenExpired)));

        let forged = token_with(3600, "someone-else", None);
        assert!(matches!(verify_owner_token(&forged, &config), Err(AuthError::InvalidSignature)));

        assert!(matches!(verify_owner_token("garbage", &config), Err(AuthError::MalformedToken)));
    }

    #[test]
    fn audience_is_checked_when_configured() {
        let config = AuthConfig::new(Some(JWT_SECRET), Some("autotrader".into()), None);
        let good = token_with(3600, JWT_SECRET, Some("autotrader"));
        let bad = token_with(3600, JWT_SECRET, Some("other-app"));
        assert!(verify_owner_token(&good, &config).is_ok());
        assert!(matches!(verify_owner_token(&bad, &config), Err(AuthError::InvalidAudience)));
    }

    #[test]
    fn owner_auth_fails_closed_without_secret() {
        let token = token_with(3600, JWT_SECRET, None);
        assert!(matches!(
            verify_owner_token(&token, &AuthConfig::default()),
            Err(AuthError::OwnerAuthNotConfigured)
        ));
    }

    #[tokio::test]
    async fn trigger_accepts_header_or_bearer() {
        let (state, _dir) = test_state();
        let mut header = parts(&[(SCHEDULER_SECRET_HEADER, TRIGGER_SECRET)]);
        assert!(SchedulerTrigger::from_request_parts(&mut header, &state).await.is_ok());

        let mut bearer = parts(&[("authorization", &format!("Bearer {TRIGGER_SECRET}"))]);
        assert!(SchedulerTrigger::from_request_parts(&mut bearer, &state).await.is_ok());
    }

    #[tokio::test]
    async fn trigger_rejects_wrong_secret_and_owner_tokens() {
        let (state, _dir) = test_state();
        let mut wrong = parts(&[(SCHEDULER_SECRET_HEADER, "guess")]);
        assert!(matches!(
            SchedulerTrigger::from_request_parts(&mut wrong, &state).await,
            Err(AuthError::InvalidTriggerSecret)
        ));

        let token = owner_token("user_1");
        let mut owner = parts(&[("authorization", &format!("Bearer {token}"))]);
        assert!(matches!(
            SchedulerTrigger::from_request_parts(&mut owner, &state).await,
            Err(AuthError::InvalidTriggerSecret)
        ));

        let mut none = parts(&[]);
        assert!(matches!(
            SchedulerTrigger::from_request_parts(&mut none, &state).await,
            Err(AuthError::MissingAuthHeader)
        ));
    }

    #[tokio::test]
    async fn trigger_fails_closed_without_configured_secret() {
        let (mut state, _dir) = test_state();
        state.auth_config = std::sync::Arc::new(AuthConfig::new(Some(JWT_SECRET), None, None));
        let mut request = parts(&[(SCHEDULER_SECRET_HEADER, TRIGGER_SECRET)]);
        assert!(matches!(
            SchedulerTrigger::from_request_parts(&mut request, &state).await,
            Err(AuthError::TriggerNotConfigured)
        ));
    }

    #[test]
    fn secret_comparison() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("abc", "abcd"));
        assert!(!secrets_match("abc", ""));
    }
}
