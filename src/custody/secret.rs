// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Zeroizing wrappers for execution passwords and exchange signing keys.
//!
//! Neither type implements `Clone`, and both redact themselves in `Debug`
//! output, so a stray `{:?}` in a log line cannot leak key material.

use std::fmt;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

/// Length of a secp256k1 private key in bytes.
pub const SIGNING_KEY_LEN: usize = 32;

// =============================================================================
// ExecutionPassword
// =============================================================================

/// The owner's password that unlocks their encrypted exchange key.
///
/// Wiped from memory on drop. Clones are wiped too.
#[derive(Clone)]
pub struct ExecutionPassword(Zeroizing<String>);

impl ExecutionPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }

    /// Borrow the plaintext. Callers must not copy it into long-lived storage.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ExecutionPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExecutionPassword(<redacted>)")
    }
}

impl Serialize for ExecutionPassword {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for ExecutionPassword {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

// =============================================================================
// SigningKey
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum KeyFormatError {
    #[error("decrypted key is not a 32-byte hex or raw secp256k1 key")]
    InvalidEncoding,

    #[error("decrypted key is not a valid secp256k1 scalar")]
    InvalidScalar,
}

/// A decrypted exchange private key.
///
/// Lives only for the duration of one signing operation. The byte buffer is
/// zeroized when the value is dropped.
pub struct SigningKey {
    bytes: Zeroizing<[u8; SIGNING_KEY_LEN]>,
}

impl SigningKey {
    /// Parse the vault plaintext into a key.
    ///
    /// Accepts a 64-character hex string (optional `0x` prefix, surrounding
    /// whitespace ignored) or the raw 32 key bytes.
    pub fn from_decrypted(plaintext: &[u8]) -> Result<Self, KeyFormatError> {
        let mut bytes = Zeroizing::new([0u8; SIGNING_KEY_LEN]);

        match std::str::from_utf8(plaintext) {
            Ok(text) if text.trim().len() >= 2 * SIGNING_KEY_LEN => {
                let trimmed = text.trim();
                let hex = trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                    .unwrap_or(trimmed);
                if hex.len() != 2 * SIGNING_KEY_LEN {
                    return Err(KeyFormatError::InvalidEncoding);
                }
                alloy::hex::decode_to_slice(hex, &mut bytes[..])
                    .map_err(|_| KeyFormatError::InvalidEncoding)?;
            }
            _ if plaintext.len() == SIGNING_KEY_LEN => bytes.copy_from_slice(plaintext),
            _ => return Err(KeyFormatError::InvalidEncoding),
        }

        // Reject zero and out-of-range scalars up front.
        k256::ecdsa::SigningKey::from_slice(&bytes[..])
            .map_err(|_| KeyFormatError::InvalidScalar)?;

        Ok(Self { bytes })
    }

    /// Build a local signer for a single signing call.
    pub(crate) fn signer(&self) -> Result<PrivateKeySigner, KeyFormatError> {
        let key = k256::ecdsa::SigningKey::from_slice(&self.bytes[..])
            .map_err(|_| KeyFormatError::InvalidScalar)?;
        Ok(PrivateKeySigner::from_signing_key(key))
    }

    /// Address controlled by this key.
    pub fn address(&self) -> Result<Address, KeyFormatError> {
        Ok(self.signer()?.address())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}
