// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Exchange Integration
//!
//! Turns a trade intent into a signed perpetuals order:
//!
//! 1. resolve the coin to an asset index ([`assets`])
//! 2. build the order wire struct with decimal strings ([`action`])
//! 3. msgpack-encode, append nonce and vault marker, keccak256 ([`action`])
//! 4. sign the phantom agent as EIP-712 typed data ([`signing`])
//! 5. POST `{action, nonce, signature, vaultAddress}` ([`client`])

pub mod action;
pub mod assets;
pub mod client;
pub mod nonce;
pub mod signing;
pub mod types;

pub use action::{format_decimal, ClientOrderId, OrderAction};
pub use client::{ExchangeClient, OrderOutcome, TradeOptions, TradeResult};
pub use signing::OrderSignature;
pub use types::{ExchangeError, ExchangeNetwork, TimeInForce};
