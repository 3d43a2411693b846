// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Self-contained session tokens.
//!
//! A token is `base64(iv[12] || ciphertext || tag[16] || key[32])`: the
//! AES-256-GCM key travels inside the token itself. Confidentiality therefore
//! rests entirely on the token staying inside the database; whoever can read
//! a token can recover the password it wraps. The encryption only keeps the
//! password out of plain JSON dumps and accidental logging.

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use ring::rand::SecureRandom;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::secret::ExecutionPassword;
use super::vault::{self, IV_LEN, KEY_LEN, TAG_LEN};

/// Plaintext carried inside a session token.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenClaims {
    pub owner: String,
    pub password: ExecutionPassword,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("session token is malformed")]
    Malformed,

    #[error("session token could not be decrypted")]
    Corrupt,

    #[error("failed to seal session token")]
    Seal,
}

/// Encrypt claims into an opaque token string.
pub fn seal_token(
    claims: &SessionTokenClaims,
    rng: &dyn SecureRandom,
) -> Result<String, TokenError> {
    let payload = Zeroizing::new(serde_json::to_vec(claims).map_err(|_| TokenError::Seal)?);
    let key = Zeroizing::new(vault::random_array::<KEY_LEN>(rng).map_err(|_| TokenError::Seal)?);
    let iv = vault::random_array::<IV_LEN>(rng).map_err(|_| TokenError::Seal)?;

    let sealed = vault::seal(&key, iv, &payload).map_err(|_| TokenError::Seal)?;

    let mut raw = Zeroizing::new(Vec::with_capacity(IV_LEN + sealed.len() + KEY_LEN));
    raw.extend_from_slice(&iv);
    raw.extend_from_slice(&sealed);
    raw.extend_from_slice(&key[..]);
    Ok(Base64::encode_string(&raw))
}

/// Decrypt a token produced by [`seal_token`].
pub fn open_token(token: &str) -> Result<SessionTokenClaims, TokenError> {
    let raw = Zeroizing::new(Base64::decode_vec(token).map_err(|_| TokenError::Malformed)?);
    if raw.len() < IV_LEN + TAG_LEN + KEY_LEN {
        return Err(TokenError::Malformed);
    }

    let key_start = raw.len() - KEY_LEN;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&raw[key_start..]);
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&raw[..IV_LEN]);

    let payload =
        vault::open(&key, iv, &raw[IV_LEN..key_start]).map_err(|_| TokenError::Corrupt)?;
    serde_json::from_slice(&payload).map_err(|_| TokenError::Corrupt)
}
