// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Custody
//!
//! Owners upload their exchange key encrypted client-side. At execution time
//! the server needs the password that unlocks it, and obtains it from one of
//! three tiers (see [`custodian`]). Decrypted keys exist only inside a single
//! signing call.

pub mod custodian;
pub mod secret;
pub mod token;
pub mod vault;

pub use custodian::{
    CredentialStatus, CredentialTier, CustodyError, NoCredentialReason, PasswordResolution,
    SessionCustodian, DEFAULT_SESSION_TTL_SECS, MAX_SESSION_TTL_SECS, MIN_SESSION_TTL_SECS,
};
pub use secret::{ExecutionPassword, KeyFormatError, SigningKey};
pub use vault::{CredentialVault, EncryptedSecret, VaultError};
