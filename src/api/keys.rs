// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Exchange key and persistent-credential endpoints.
//!
//! The key arrives already encrypted under the owner's password. Responses
//! carry metadata only; ciphertext is never returned.

use alloy::primitives::Address;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    audit_log,
    auth::Auth,
    custody::{CredentialStatus, CustodyError, EncryptedSecret, ExecutionPassword},
    error::ApiError,
    state::AppState,
    storage::{AuditEventType, KeyRecordSummary, KeyRepository},
};

/// Upload or replace the owner's encrypted exchange key.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoreKeyRequest {
    /// Exchange account address the key controls.
    pub wallet_address: String,
    /// Private key encrypted client-side under the owner's password.
    pub encrypted_key: EncryptedSecret,
}

/// A password proving the owner can unlock their stored key.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordRequest {
    #[schema(value_type = String)]
    pub password: ExecutionPassword,
}

/// Get metadata of the stored key.
#[utoipa::path(
    get,
    path = "/v1/keys",
    tag = "Keys",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Key metadata", body = KeyRecordSummary),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No key stored")
    )
)]
pub async fn get_key(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<KeyRecordSummary>, ApiError> {
    let record = KeyRepository::new(&state.db)
        .get(&user.user_id)?
        .ok_or(CustodyError::NoKeyRecord)?;
    Ok(Json(KeyRecordSummary::from(&record)))
}

/// Store or replace the encrypted key.
///
/// Replacing a key clears the persistent credential and revokes every
/// session, since both were tied to the previous key's password.
#[utoipa::path(
    put,
    path = "/v1/keys",
    tag = "Keys",
    security(("bearer_auth" = [])),
    request_body = StoreKeyRequest,
    responses(
        (status = 200, description = "Key stored", body = KeyRecordSummary),
        (status = 400, description = "Invalid wallet address"),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Malformed encrypted key")
    )
)]
pub async fn put_key(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<StoreKeyRequest>,
) -> Result<Json<KeyRecordSummary>, ApiError> {
    let address: Address = request
        .wallet_address
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request("walletAddress is not a valid address"))?;
    request
        .encrypted_key
        .check_format()
        .map_err(|e| ApiError::unprocessable(format!("encryptedKey: {e}")))?;

    let record = state
        .custodian
        .store_key(&user.user_id, &address.to_string(), request.encrypted_key)?;

    audit_log!(&state.db, AuditEventType::KeyStored, &user, "key", &record.wallet_address);
    Ok(Json(KeyRecordSummary::from(&record)))
}

/// Delete the stored key and every session.
#[utoipa::path(
    delete,
    path = "/v1/keys",
    tag = "Keys",
    security(("bearer_auth" = [])),
    responses(
        (status = 204, description = "Key deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No key stored")
    )
)]
pub async fn delete_key(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.custodian.delete_key(&user.user_id)?;
    audit_log!(&state.db, AuditEventType::KeyDeleted, &user);
    Ok(StatusCode::NO_CONTENT)
}

/// Enable the persistent credential tier.
///
/// The password is checked against the stored key, then kept encrypted
/// under the server secret so scheduled runs need no session.
#[utoipa::path(
    put,
    path = "/v1/keys/persistent",
    tag = "Keys",
    security(("bearer_auth" = [])),
    request_body = PasswordRequest,
    responses(
        (status = 200, description = "Persistent credential enabled", body = KeyRecordSummary),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Password does not unlock the key"),
        (status = 404, description = "No key stored"),
        (status = 503, description = "Persistent tier not configured")
    )
)]
pub async fn enable_persistent(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<PasswordRequest>,
) -> Result<Json<KeyRecordSummary>, ApiError> {
    let owner = user.user_id.clone();
    let record = state
        .custodian
        .blocking(move |custodian| custodian.enable_persistent(&owner, &request.password))
        .await?;
    audit_log!(&state.db, AuditEventType::PersistentEnabled, &user);
    Ok(Json(KeyRecordSummary::from(&record)))
}

/// Disable the persistent credential tier.
#[utoipa::path(
    delete,
    path = "/v1/keys/persistent",
    tag = "Keys",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Persistent credential cleared", body = KeyRecordSummary),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No key stored")
    )
)]
pub async fn disable_persistent(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<KeyRecordSummary>, ApiError> {
    let record = state.custodian.disable_persistent(&user.user_id)?;
    audit_log!(&state.db, AuditEventType::PersistentDisabled, &user);
    Ok(Json(KeyRecordSummary::from(&record)))
}

/// Which credential tier would serve a scheduled run right now.
#[utoipa::path(
    get,
    path = "/v1/credentials/status",
    tag = "Keys",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Credential status", body = CredentialStatus),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn credential_status(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<CredentialStatus>, ApiError> {
    Ok(Json(state.custodian.credential_status(&user.user_id)?))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use crate::custody::custodian::tests::PASSWORD;
    use crate::custody::secret::tests::{TEST_KEY_ADDRESS, TEST_KEY_HEX};
    use crate::custody::{CredentialTier, CredentialVault};
    use crate::state::test_support::test_state;

    pub(crate) fn user(id: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: id.to_string(),
            session_id: None,
            expires_at: 0,
        }
    }

    pub(crate) fn store_request() -> StoreKeyRequest {
        StoreKeyRequest {
            wallet_address: TEST_KEY_ADDRESS.to_lowercase(),
            encrypted_key: CredentialVault::new()
                .encrypt(TEST_KEY_HEX.as_bytes(), PASSWORD)
                .unwrap(),
        }
    }

    fn password(pw: &str) -> Json<PasswordRequest> {
        Json(PasswordRequest {
            password: ExecutionPassword::new(pw),
        })
    }

    #[tokio::test]
    async fn store_and_read_key_metadata() {
        let (state, _dir) = test_state();
        let Json(stored) = put_key(Auth(user("user_1")), State(state.clone()), Json(store_request()))
            .await
            .unwrap();
        assert_eq!(stored.wallet_address, TEST_KEY_ADDRESS);
        assert!(!stored.persistent_enabled);

        let Json(fetched) = get_key(Auth(user("user_1")), State(state.clone())).await.unwrap();
        assert_eq!(fetched.wallet_address, TEST_KEY_ADDRESS);

        let missing = get_key(Auth(user("user_2")), State(state)).await.unwrap_err();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_bad_address_and_malformed_ciphertext() {
        let (state, _dir) = test_state();
        let mut request = store_request();
        request.wallet_address = "not-an-address".into();
        let err = put_key(Auth(user("user_1")), State(state.clone()), Json(request))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let mut request = store_request();
        request.encrypted_key.ciphertext = "%%%".into();
        let err = put_key(Auth(user("user_1")), State(state), Json(request))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn persistent_tier_lifecycle() {
        let (state, _dir) = test_state();
        put_key(Auth(user("user_1")), State(state.clone()), Json(store_request()))
            .await
            .unwrap();

        let err = enable_persistent(Auth(user("user_1")), State(state.clone()), password("wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let Json(enabled) = enable_persistent(Auth(user("user_1")), State(state.clone()), password(PASSWORD))
            .await
            .unwrap();
        assert!(enabled.persistent_enabled);

        let Json(status) = credential_status(Auth(user("user_1")), State(state.clone()))
            .await
            .unwrap();
        assert_eq!(status.tier, CredentialTier::Persistent);

        let Json(disabled) = disable_persistent(Auth(user("user_1")), State(state.clone()))
            .await
            .unwrap();
        assert!(!disabled.persistent_enabled);
    }

    #[tokio::test]
    async fn delete_key_then_missing() {
        let (state, _dir) = test_state();
        put_key(Auth(user("user_1")), State(state.clone()), Json(store_request()))
            .await
            .unwrap();

        let status = delete_key(Auth(user("user_1")), State(state.clone())).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = delete_key(Auth(user("user_1")), State(state)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
