// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Phantom agent signing for exchange L1 actions.
//!
//! The signed message is not the action itself but an EIP-712 `Agent`
//! struct carrying the action's connection id. The signer is created and
//! dropped inside [`sign_l1_action`]; no key material outlives the call.

use alloy::primitives::{Address, Signature, B256, U256};
use alloy::signers::SignerSync;
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::types::{
    ExchangeError, ExchangeNetwork, SIGNING_CHAIN_ID, SIGNING_DOMAIN_NAME, SIGNING_DOMAIN_VERSION,
};
use crate::custody::SigningKey;

sol! {
    /// Phantom agent signed in place of the raw action.
    #[derive(Debug)]
    struct Agent {
        string source;
        bytes32 connectionId;
    }
}

/// `(r, s, v)` as the exchange expects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderSignature {
    /// 0x-prefixed 32-byte hex
    pub r: String,
    /// 0x-prefixed 32-byte hex
    pub s: String,
    /// 27 or 28
    pub v: u8,
}

impl From<&Signature> for OrderSignature {
    fn from(sig: &Signature) -> Self {
        Self {
            r: alloy::hex::encode_prefixed(sig.r().to_be_bytes::<32>()),
            s: alloy::hex::encode_prefixed(sig.s().to_be_bytes::<32>()),
            v: 27 + u8::from(sig.v()),
        }
    }
}

pub fn exchange_domain() -> Eip712Domain {
    Eip712Domain::new(
        Some(SIGNING_DOMAIN_NAME.into()),
        Some(SIGNING_DOMAIN_VERSION.into()),
        Some(U256::from(SIGNING_CHAIN_ID)),
        Some(Address::ZERO),
        None,
    )
}

/// EIP-712 signing hash of the phantom agent for `connection_id`.
pub fn agent_signing_hash(connection_id: B256, network: ExchangeNetwork) -> B256 {
    let agent = Agent {
        source: network.config().source.to_string(),
        connectionId: connection_id,
    };
    agent.eip712_signing_hash(&exchange_domain())
}

/// Sign an L1 action's connection id with `key`.
pub fn sign_l1_action(
    key: &SigningKey,
    connection_id: B256,
    network: ExchangeNetwork,
) -> Result<OrderSignature, ExchangeError> {
    let hash = agent_signing_hash(connection_id, network);
    let signer = key
        .signer()
        .map_err(|e| ExchangeError::Signing(e.to_string()))?;
    let signature = signer
        .sign_hash_sync(&hash)
        .map_err(|e| ExchangeError::Signing(e.to_string()))?;
    Ok(OrderSignature::from(&signature))
}
