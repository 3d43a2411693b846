// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Autotrader Server - Custodial Autonomous Trading Service
//!
//! Holds owners' password-encrypted exchange keys, decides per run which
//! password tier (persistent, session or per-request) may unlock them, and
//! executes scheduled analysis cycles that place signed orders on the
//! exchange.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Owner bearer tokens and the scheduler trigger secret
//! - `custody` - Credential vault and session custodian
//! - `exchange` - Order actions, L1 signing and the exchange HTTP client
//! - `scheduler` - Batch orchestration and session housekeeping
//! - `storage` - Embedded database, repositories and audit log

pub mod api;
pub mod auth;
pub mod config;
pub mod custody;
pub mod error;
pub mod exchange;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod trading;
