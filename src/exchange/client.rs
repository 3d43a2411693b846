// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Exchange REST client: asset resolution, order signing and submission.

use std::time::Duration;

use alloy::primitives::Address;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use utoipa::ToSchema;

use super::action::{connection_id, BulkOrderAction, ClientOrderId, OrderAction};
use super::assets::AssetCache;
use super::nonce::NonceGenerator;
use super::signing::{sign_l1_action, OrderSignature};
use super::types::{ExchangeError, ExchangeNetwork, TimeInForce};
use crate::custody::SigningKey;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Optional order parameters.
#[derive(Debug, Clone, Default)]
pub struct TradeOptions {
    pub reduce_only: bool,
    pub time_in_force: TimeInForce,
    pub client_order_id: Option<ClientOrderId>,
    pub vault_address: Option<Address>,
}

/// Body POSTed to `/exchange`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub action: BulkOrderAction,
    pub nonce: u64,
    pub signature: OrderSignature,
    pub vault_address: Option<String>,
}

/// A fully signed order, ready to submit.
#[derive(Debug, Clone)]
pub struct SignedOrder {
    pub request: ExchangeRequest,
}

/// What the exchange did with an accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Resting {
        order_id: u64,
    },
    Filled {
        order_id: u64,
        total_size: String,
        avg_price: String,
    },
    /// The request was well formed but the order itself was refused.
    Rejected {
        message: String,
    },
}

impl OrderOutcome {
    pub fn order_id(&self) -> Option<u64> {
        match self {
            Self::Resting { order_id } | Self::Filled { order_id, .. } => Some(*order_id),
            Self::Rejected { .. } => None,
        }
    }
}

/// `{success, orderId?, error?}` summary of one trade attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TradeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Result<OrderOutcome, ExchangeError>> for TradeResult {
    fn from(result: &Result<OrderOutcome, ExchangeError>) -> Self {
        match result {
            Ok(OrderOutcome::Rejected { message }) => Self {
                success: false,
                order_id: None,
                error: Some(message.clone()),
            },
            Ok(outcome) => Self {
                success: true,
                order_id: outcome.order_id(),
                error: None,
            },
            Err(e) => Self {
                success: false,
                order_id: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub struct ExchangeClient {
    network: ExchangeNetwork,
    api_url: String,
    http: Client,
    assets: AssetCache,
    nonces: NonceGenerator,
}

impl ExchangeClient {
    pub fn new(
        network: ExchangeNetwork,
        api_url_override: Option<String>,
        asset_ttl: Duration,
    ) -> Result<Self, ExchangeError> {
        let api_url = api_url_override
            .unwrap_or_else(|| network.config().api_url.to_string())
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            network,
            api_url,
            http,
            assets: AssetCache::new(asset_ttl),
            nonces: NonceGenerator::new(),
        })
    }

    pub fn network(&self) -> ExchangeNetwork {
        self.network
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Seeded table, then cache, then a fresh `meta` fetch.
    pub async fn resolve_asset(&self, coin: &str) -> Result<u32, ExchangeError> {
        if let Some(index) = self.assets.lookup(coin) {
            return Ok(index);
        }

        let universe = self.fetch_universe().await?;
        self.assets.store_universe(&universe);
        self.assets
            .lookup(coin)
            .ok_or_else(|| ExchangeError::AssetNotFound(coin.trim().to_ascii_uppercase()))
    }

    async fn fetch_universe(&self) -> Result<Vec<String>, ExchangeError> {
        let body = self.post_json("/info", &json!({ "type": "meta" })).await?;
        let universe = body
            .get("universe")
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::InvalidResponse("meta without universe".into()))?;

        let names = universe
            .iter()
            .map(|entry| {
                entry
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();
        debug!(assets = names.len(), "Fetched exchange asset universe");
        Ok(names)
    }

    /// Encode, hash and sign `order`. Pure: touches neither clock nor network.
    pub fn sign_order(
        &self,
        key: &SigningKey,
        order: &OrderAction,
        vault_address: Option<Address>,
        nonce: u64,
    ) -> Result<SignedOrder, ExchangeError> {
        let action = BulkOrderAction::single(order)?;
        let digest = connection_id(&action, nonce, vault_address)?;
        let signature = sign_l1_action(key, digest, self.network)?;

        Ok(SignedOrder {
            request: ExchangeRequest {
                action,
                nonce,
                signature,
                vault_address: vault_address.map(|a| a.to_string().to_lowercase()),
            },
        })
    }

    /// Place one limit order. The key is consumed and dropped before the
    /// request leaves the process.
    pub async fn execute_trade(
        &self,
        key: SigningKey,
        coin: &str,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
        options: TradeOptions,
    ) -> Result<OrderOutcome, ExchangeError> {
        let asset_index = self.resolve_asset(coin).await?;
        let order = OrderAction {
            asset_index,
            is_buy,
            price,
            size,
            reduce_only: options.reduce_only,
            time_in_force: options.time_in_force,
            client_order_id: options.client_order_id,
        };

        let nonce = self.nonces.next();
        let signed = self.sign_order(&key, &order, options.vault_address, nonce);
        drop(key);
        let signed = signed?;

        info!(
            coin = %coin,
            asset = asset_index,
            is_buy,
            nonce,
            network = %self.network,
            "Submitting exchange order"
        );
        self.submit(&signed).await
    }

    pub async fn submit(&self, signed: &SignedOrder) -> Result<OrderOutcome, ExchangeError> {
        let body = serde_json::to_value(&signed.request)
            .map_err(|e| ExchangeError::Encoding(e.to_string()))?;
        let response = self.post_json("/exchange", &body).await?;
        parse_order_response(&response)
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, ExchangeError> {
        let response = self
            .http
            .post(format!("{}{}", self.api_url, path))
            .json(payload)
            .send()
            .await
            .map_err(|e| ExchangeError::Http(format!("POST {path} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::Http(format!("POST {path} body read failed: {e}")))?;

        if !status.is_success() {
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::InvalidResponse(format!("POST {path} invalid JSON: {e}")))
    }
}

/// Map an `/exchange` response body to an outcome.
///
/// `{"status":"err","response":"..."}` is an API error. An `ok` response
/// carries one status per order: `resting`, `filled` or `error`.
pub fn parse_order_response(body: &Value) -> Result<OrderOutcome, ExchangeError> {
    match body.get("status").and_then(Value::as_str) {
        Some("ok") => {}
        Some("err") => {
            let message = match body.get("response") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "unknown exchange error".to_string(),
            };
            return Err(ExchangeError::Api {
                status: 200,
                message,
            });
        }
        _ => {
            return Err(ExchangeError::InvalidResponse(format!(
                "missing status in {body}"
            )))
        }
    }

    let status = body
        .pointer("/response/data/statuses/0")
        .ok_or_else(|| ExchangeError::InvalidResponse("no order status returned".into()))?;

    if let Some(message) = status.get("error").and_then(Value::as_str) {
        return Ok(OrderOutcome::Rejected {
            message: message.to_string(),
        });
    }
    if let Some(resting) = status.get("resting") {
        return Ok(OrderOutcome::Resting {
            order_id: order_id(resting)?,
        });
    }
    if let Some(filled) = status.get("filled") {
        let field = |name: &str| {
            filled
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        return Ok(OrderOutcome::Filled {
            order_id: order_id(filled)?,
            total_size: field("totalSz"),
            avg_price: field("avgPx"),
        });
    }

    Err(ExchangeError::InvalidResponse(format!(
        "unrecognised order status {status}"
    )))
}

fn order_id(entry: &Value) -> Result<u64, ExchangeError> {
    entry
        .get("oid")
        .and_then(Value::as_u64)
        .ok_or_else(|| ExchangeError::InvalidResponse("order status without oid".into()))
}
