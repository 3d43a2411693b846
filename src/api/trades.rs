// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Manual order placement.
//!
//! A request carrying a password uses it for this one order and nothing
//! else (ephemeral tier). Without one, the custodian's persistent or session
//! tier must supply it, and the request is refused when neither can.

use axum::{extract::State, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    auth::Auth,
    custody::{ExecutionPassword, PasswordResolution},
    error::ApiError,
    exchange::{ClientOrderId, ExchangeError, TimeInForce, TradeOptions, TradeResult},
    state::AppState,
    trading::{TradeError, TradeIntent},
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    /// Coin symbol, e.g. `BTC`.
    pub coin: String,
    pub is_buy: bool,
    /// Order size in coin units, as a decimal string or number.
    #[schema(value_type = String)]
    pub size: Decimal,
    /// Limit price, as a decimal string or number.
    #[schema(value_type = String)]
    pub price: Decimal,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    /// Optional `0x`-prefixed 16-byte client order id.
    #[serde(default)]
    pub client_order_id: Option<String>,
    /// Password for this order only. Omit to use a stored credential.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub password: Option<ExecutionPassword>,
}

/// Where the password for an order came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    Ephemeral,
    Persistent,
    Session,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TradeResponse {
    #[serde(flatten)]
    pub result: TradeResult,
    pub credential: CredentialSource,
}

async fn resolve_password(
    state: &AppState,
    owner: &str,
    supplied: Option<ExecutionPassword>,
) -> Result<(ExecutionPassword, CredentialSource), ApiError> {
    if let Some(password) = supplied.filter(|p| !p.is_empty()) {
        return Ok((password, CredentialSource::Ephemeral));
    }

    let owner = owner.to_string();
    let resolution = state
        .custodian
        .blocking(move |custodian| custodian.get_execution_password(&owner))
        .await?;
    match resolution {
        PasswordResolution::Persistent { password } => Ok((password, CredentialSource::Persistent)),
        PasswordResolution::Session { password, .. } => Ok((password, CredentialSource::Session)),
        PasswordResolution::Unavailable { reason } => Err(TradeError::NoCredential(reason).into()),
    }
}

/// Place one limit order for the authenticated owner.
///
/// A refusal by the exchange is a successful request with `success: false`.
#[utoipa::path(
    post,
    path = "/v1/trades",
    tag = "Trading",
    security(("bearer_auth" = [])),
    request_body = TradeRequest,
    responses(
        (status = 200, description = "Order submitted", body = TradeResponse),
        (status = 400, description = "Invalid order or unknown asset"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Password does not unlock the key"),
        (status = 404, description = "No key stored"),
        (status = 412, description = "No password supplied and no stored credential"),
        (status = 502, description = "Exchange unreachable or returned an error")
    )
)]
pub async fn place_trade(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<TradeRequest>,
) -> Result<Json<TradeResponse>, ApiError> {
    let coin = request.coin.trim().to_uppercase();
    if coin.is_empty() {
        return Err(ApiError::bad_request("coin is required"));
    }
    let client_order_id = request
        .client_order_id
        .as_deref()
        .map(str::parse::<ClientOrderId>)
        .transpose()?;

    let intent = TradeIntent {
        coin,
        is_buy: request.is_buy,
        size: request.size,
        price: request.price,
        options: TradeOptions {
            reduce_only: request.reduce_only,
            time_in_force: request.time_in_force,
            client_order_id,
            vault_address: None,
        },
    };

    let (password, credential) = resolve_password(&state, &user.user_id, request.password).await?;
    info!(owner = %user.user_id, coin = %intent.coin, credential = ?credential, "Manual trade requested");

    let outcome = state
        .trades
        .execute_with_password(&user.user_id, &password, &intent)
        .await?;

    Ok(Json(TradeResponse {
        result: TradeResult::from(&Ok::<_, ExchangeError>(outcome)),
        credential,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::keys::{put_key, tests::{store_request, user}};
    use crate::custody::custodian::tests::PASSWORD;
    use crate::state::test_support::test_state;
    use axum::http::StatusCode;

    fn request(password: Option<&str>) -> Json<TradeRequest> {
        Json(TradeRequest {
            coin: "btc".into(),
            is_buy: true,
            size: Decimal::new(1, 3),
            price: Decimal::new(60_000, 0),
            reduce_only: false,
            time_in_force: TimeInForce::Gtc,
            client_order_id: None,
            password: password.map(ExecutionPassword::new),
        })
    }

    async fn state_with_key() -> (AppState, tempfile::TempDir) {
        let (state, dir) = test_state();
        put_key(Auth(user("user_1")), State(state.clone()), Json(store_request()))
            .await
            .unwrap();
        (state, dir)
    }

    #[tokio::test]
    async fn no_password_and_no_stored_credential_is_refused() {
        let (state, _dir) = state_with_key().await;
        let err = place_trade(Auth(user("user_1")), State(state), request(None))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn wrong_ephemeral_password_is_forbidden() {
        let (state, _dir) = state_with_key().await;
        let err = place_trade(Auth(user("user_1")), State(state), request(Some("wrong")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unreachable_exchange_is_bad_gateway() {
        let (state, _dir) = state_with_key().await;
        let err = place_trade(Auth(user("user_1")), State(state), request(Some(PASSWORD)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn invalid_client_order_id_is_bad_request() {
        let (state, _dir) = state_with_key().await;
        let Json(mut body) = request(Some(PASSWORD));
        body.client_order_id = Some("0x1234".into());
        let err = place_trade(Auth(user("user_1")), State(state), Json(body))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_tier_supplies_password() {
        let (state, _dir) = state_with_key().await;
        state
            .custodian
            .create_session("user_1", &ExecutionPassword::new(PASSWORD), chrono::Duration::hours(1))
            .unwrap();
        let (_, source) = resolve_password(&state, "user_1", None).await.unwrap();
        assert_eq!(source, CredentialSource::Session);

        let (_, source) =
            resolve_password(&state, "user_1", Some(ExecutionPassword::new(PASSWORD)))
                .await
                .unwrap();
        assert_eq!(source, CredentialSource::Ephemeral);
    }
}
