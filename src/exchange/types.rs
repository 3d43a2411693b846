// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Exchange network constants and shared types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Exchange network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: &'static str,
    /// REST API base URL (`/exchange` and `/info` live below it)
    pub api_url: &'static str,
    /// Phantom agent `source` tag distinguishing mainnet from testnet signatures
    pub source: &'static str,
}

pub const EXCHANGE_MAINNET: NetworkConfig = NetworkConfig {
    name: "Hyperliquid Mainnet",
    api_url: "https://api.hyperliquid.xyz",
    source: "a",
};

pub const EXCHANGE_TESTNET: NetworkConfig = NetworkConfig {
    name: "Hyperliquid Testnet",
    api_url: "https://api.hyperliquid-testnet.xyz",
    source: "b",
};

/// EIP-712 domain used for L1 action signatures.
pub const SIGNING_DOMAIN_NAME: &str = "Exchange";
pub const SIGNING_DOMAIN_VERSION: &str = "1";
pub const SIGNING_CHAIN_ID: u64 = 1337;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeNetwork {
    Mainnet,
    Testnet,
}

impl ExchangeNetwork {
    pub fn config(self) -> NetworkConfig {
        match self {
            Self::Mainnet => EXCHANGE_MAINNET,
            Self::Testnet => EXCHANGE_TESTNET,
        }
    }
}

impl FromStr for ExchangeNetwork {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            other => Err(format!("unknown exchange network `{other}`")),
        }
    }
}

impl fmt::Display for ExchangeNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mainnet => f.write_str("mainnet"),
            Self::Testnet => f.write_str("testnet"),
        }
    }
}

/// Limit order time in force.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum TimeInForce {
    /// Good til cancelled
    #[default]
    Gtc,
    /// Immediate or cancel
    Ioc,
    /// Add liquidity only (post-only)
    Alo,
}

impl TimeInForce {
    /// Name used inside signed order actions.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gtc => "Gtc",
            Self::Ioc => "Ioc",
            Self::Alo => "Alo",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("unknown asset: {0}")]
    AssetNotFound(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("action encoding failed: {0}")]
    Encoding(String),

    #[error("exchange request failed: {0}")]
    Http(String),

    #[error("exchange returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected exchange response: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    /// Only transport and upstream failures may be retried. Asset, order and
    /// signing failures will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
