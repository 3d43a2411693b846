// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Order actions and their canonical byte encoding.
//!
//! The exchange verifies signatures over
//! `keccak256(msgpack(action) || nonce_be_u64 || vault_marker)`, where the
//! vault marker is `0x00` without a vault and `0x01 || address[20]` with one.
//! Field names and order of the wire structs below are part of that digest.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{keccak256, Address, B256};
use ring::rand::SecureRandom;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{ExchangeError, TimeInForce};

/// Decimal places kept in price and size strings.
const WIRE_DECIMALS: u32 = 8;

/// Format a price or size as the exchange expects: plain decimal, at most
/// eight fractional digits, no trailing zeros.
pub fn format_decimal(value: Decimal) -> String {
    let normalized = value.round_dp(WIRE_DECIMALS).normalize();
    if normalized.is_zero() {
        "0".to_string()
    } else {
        normalized.to_string()
    }
}

// =============================================================================
// Client order id
// =============================================================================

/// 128-bit client order id, rendered as `0x` + 32 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOrderId([u8; 16]);

impl ClientOrderId {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn random(rng: &dyn SecureRandom) -> Result<Self, ExchangeError> {
        let mut bytes = [0u8; 16];
        rng.fill(&mut bytes)
            .map_err(|_| ExchangeError::InvalidOrder("random generator unavailable".into()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&alloy::hex::encode_prefixed(self.0))
    }
}

impl FromStr for ClientOrderId {
    type Err = ExchangeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let hex = raw.strip_prefix("0x").unwrap_or(raw);
        let mut bytes = [0u8; 16];
        alloy::hex::decode_to_slice(hex, &mut bytes)
            .map_err(|_| ExchangeError::InvalidOrder(format!("invalid client order id `{raw}`")))?;
        Ok(Self(bytes))
    }
}

// =============================================================================
// OrderAction
// =============================================================================

/// Normalized trade intent.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAction {
    pub asset_index: u32,
    pub is_buy: bool,
    pub price: Decimal,
    pub size: Decimal,
    pub reduce_only: bool,
    pub time_in_force: TimeInForce,
    pub client_order_id: Option<ClientOrderId>,
}

impl OrderAction {
    /// Validate and convert to the wire representation.
    pub fn to_wire(&self) -> Result<OrderWire, ExchangeError> {
        if self.price <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder("price must be positive".into()));
        }
        let size = format_decimal(self.size);
        if self.size <= Decimal::ZERO || size == "0" {
            return Err(ExchangeError::InvalidOrder("size must be positive".into()));
        }

        Ok(OrderWire {
            asset: self.asset_index,
            is_buy: self.is_buy,
            price: format_decimal(self.price),
            size,
            reduce_only: self.reduce_only,
            order_type: OrderTypeWire {
                limit: LimitWire {
                    tif: self.time_in_force.as_str().to_string(),
                },
            },
            cloid: self.client_order_id.map(|id| id.to_string()),
        })
    }
}

// =============================================================================
// Wire structs
// =============================================================================

/// One order in the `orders` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderWire {
    #[serde(rename = "a")]
    pub asset: u32,
    #[serde(rename = "b")]
    pub is_buy: bool,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "s")]
    pub size: String,
    #[serde(rename = "r")]
    pub reduce_only: bool,
    #[serde(rename = "t")]
    pub order_type: OrderTypeWire,
    #[serde(rename = "c", skip_serializing_if = "Option::is_none")]
    pub cloid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTypeWire {
    pub limit: LimitWire,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitWire {
    pub tif: String,
}

/// The `order` action as signed and submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOrderAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub orders: Vec<OrderWire>,
    pub grouping: String,
}

impl BulkOrderAction {
    pub fn new(orders: Vec<OrderWire>) -> Self {
        Self {
            kind: "order".to_string(),
            orders,
            grouping: "na".to_string(),
        }
    }

    pub fn single(order: &OrderAction) -> Result<Self, ExchangeError> {
        Ok(Self::new(vec![order.to_wire()?]))
    }
}

// =============================================================================
// Connection id
// =============================================================================

/// `msgpack(action) || nonce_be || vault_marker`.
pub fn action_bytes(
    action: &BulkOrderAction,
    nonce: u64,
    vault_address: Option<Address>,
) -> Result<Vec<u8>, ExchangeError> {
    let mut bytes =
        rmp_serde::to_vec_named(action).map_err(|e| ExchangeError::Encoding(e.to_string()))?;
    bytes.extend_from_slice(&nonce.to_be_bytes());
    match vault_address {
        None => bytes.push(0x00),
        Some(vault) => {
            bytes.push(0x01);
            bytes.extend_from_slice(vault.as_slice());
        }
    }
    Ok(bytes)
}

/// Keccak-256 digest of [`action_bytes`].
pub fn connection_id(
    action: &BulkOrderAction,
    nonce: u64,
    vault_address: Option<Address>,
) -> Result<B256, ExchangeError> {
    Ok(keccak256(action_bytes(action, nonce, vault_address)?))
}
