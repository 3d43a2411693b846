// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Password-based authenticated encryption for stored secrets.
//!
//! Key derivation is PBKDF2-HMAC-SHA256 with 100 000 iterations over a
//! random 16-byte salt. Encryption is AES-256-GCM with a random 12-byte IV.
//!
//! The stored blob is `base64(iv || ciphertext || tag)`. The salt and IV are
//! also stored base64-encoded alongside the blob, and decryption refuses a
//! record whose `iv` field disagrees with the blob prefix.

use std::num::NonZeroU32;

use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use zeroize::Zeroizing;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

/// Current [`EncryptedSecret`] format version.
pub const ENCRYPTED_SECRET_VERSION: u32 = 1;

fn default_version() -> u32 {
    ENCRYPTED_SECRET_VERSION
}

// =============================================================================
// Types
// =============================================================================

/// A secret encrypted under a password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EncryptedSecret {
    /// `base64(iv || ciphertext || tag)`.
    pub ciphertext: String,
    /// Base64 PBKDF2 salt.
    pub salt: String,
    /// Base64 AES-GCM IV; must equal the first 12 bytes of `ciphertext`.
    pub iv: String,
    #[serde(default = "default_version")]
    pub version: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Wrong password, tampered ciphertext, or mismatched IV. The causes are
    /// deliberately indistinguishable.
    #[error("decryption failed: wrong password or corrupted data")]
    Decryption,

    #[error("malformed encrypted secret: {0}")]
    Malformed(&'static str),

    #[error("unsupported encrypted secret version {0}")]
    UnsupportedVersion(u32),

    #[error("encryption failed")]
    Encryption,

    #[error("secure random generator unavailable")]
    Random,
}

// =============================================================================
// Primitives
// =============================================================================

pub(crate) fn random_array<const N: usize>(rng: &dyn SecureRandom) -> Result<[u8; N], VaultError> {
    let mut out = [0u8; N];
    rng.fill(&mut out).map_err(|_| VaultError::Random)?;
    Ok(out)
}

fn aead_key(key: &[u8; KEY_LEN]) -> Result<LessSafeKey, VaultError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| VaultError::Encryption)?;
    Ok(LessSafeKey::new(unbound))
}

/// AES-256-GCM seal. Returns `ciphertext || tag`.
pub(crate) fn seal(
    key: &[u8; KEY_LEN],
    iv: [u8; IV_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, VaultError> {
    let sealing = aead_key(key)?;
    let mut in_out = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::Encryption)?;
    Ok(in_out)
}

/// AES-256-GCM open of `ciphertext || tag`.
pub(crate) fn open(
    key: &[u8; KEY_LEN],
    iv: [u8; IV_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if ciphertext.len() < TAG_LEN {
        return Err(VaultError::Decryption);
    }
    let opening = aead_key(key).map_err(|_| VaultError::Decryption)?;
    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = opening
        .open_in_place(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::Decryption)?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

fn derive_key(password: &str, salt: &[u8], iterations: NonZeroU32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        &mut key[..],
    );
    key
}

// =============================================================================
// CredentialVault
// =============================================================================

/// Encrypts and decrypts secrets under a password.
#[derive(Clone)]
pub struct CredentialVault {
    rng: SystemRandom,
    iterations: NonZeroU32,
}

impl Default for CredentialVault {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialVault {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
            iterations: NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN),
        }
    }

    /// Encrypt `plaintext` under `password` with a fresh salt and IV.
    pub fn encrypt(&self, plaintext: &[u8], password: &str) -> Result<EncryptedSecret, VaultError> {
        let salt: [u8; SALT_LEN] = random_array(&self.rng)?;
        let iv: [u8; IV_LEN] = random_array(&self.rng)?;
        let key = derive_key(password, &salt, self.iterations);

        let sealed = seal(&key, iv, plaintext)?;
        let mut blob = Vec::with_capacity(IV_LEN + sealed.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&sealed);

        Ok(EncryptedSecret {
            ciphertext: Base64::encode_string(&blob),
            salt: Base64::encode_string(&salt),
            iv: Base64::encode_string(&iv),
            version: ENCRYPTED_SECRET_VERSION,
        })
    }

    /// Decrypt a secret. The returned buffer is wiped on drop.
    pub fn decrypt(
        &self,
        secret: &EncryptedSecret,
        password: &str,
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let DecodedSecret { blob, salt, iv } = secret.decode()?;
        let key = derive_key(password, &salt, self.iterations);
        open(&key, iv, &blob[IV_LEN..])
    }
}

struct DecodedSecret {
    blob: Vec<u8>,
    salt: Vec<u8>,
    iv: [u8; IV_LEN],
}

impl EncryptedSecret {
    /// Structural check without a password: version, base64 fields, length
    /// and IV consistency. Passing says nothing about the password.
    pub fn check_format(&self) -> Result<(), VaultError> {
        self.decode().map(|_| ())
    }

    fn decode(&self) -> Result<DecodedSecret, VaultError> {
        if self.version != ENCRYPTED_SECRET_VERSION {
            return Err(VaultError::UnsupportedVersion(self.version));
        }

        let blob = Base64::decode_vec(&self.ciphertext)
            .map_err(|_| VaultError::Malformed("ciphertext is not valid base64"))?;
        let salt = Base64::decode_vec(&self.salt)
            .map_err(|_| VaultError::Malformed("salt is not valid base64"))?;
        let iv_field = Base64::decode_vec(&self.iv)
            .map_err(|_| VaultError::Malformed("iv is not valid base64"))?;

        if salt.is_empty() {
            return Err(VaultError::Malformed("salt is empty"));
        }
        if blob.len() < IV_LEN + TAG_LEN {
            return Err(VaultError::Decryption);
        }
        if iv_field.as_slice() != &blob[..IV_LEN] {
            return Err(VaultError::Decryption);
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&blob[..IV_LEN]);

        Ok(DecodedSecret { blob, salt, iv })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flip_blob_bit(secret: &EncryptedSecret, byte: usize) -> EncryptedSecret {
        let mut blob = Base64::decode_vec(&secret.ciphertext).unwrap();
        blob[byte] ^= 0x01;
        EncryptedSecret {
            ciphertext: Base64::encode_string(&blob),
            ..secret.clone()
        }
    }

    #[test]
    fn roundtrip_recovers_plaintext() {
        let vault = CredentialVault::new();
        let secret = vault.encrypt(b"exchange-private-key", "correct horse").unwrap();

        assert_eq!(secret.version, ENCRYPTED_SECRET_VERSION);
        let plaintext = vault.decrypt(&secret, "correct horse").unwrap();
        assert_eq!(plaintext.as_slice(), b"exchange-private-key");
    }

    #[test]
    fn layout_is_iv_prefixed_blob() {
        let vault = CredentialVault::new();
        let secret = vault.encrypt(b"abc", "pw").unwrap();

        let blob = Base64::decode_vec(&secret.ciphertext).unwrap();
        let iv = Base64::decode_vec(&secret.iv).unwrap();
        let salt = Base64::decode_vec(&secret.salt).unwrap();
        assert_eq!(salt.len(), SALT_LEN);
        assert_eq!(iv.len(), IV_LEN);
        assert_eq!(&blob[..IV_LEN], iv.as_slice());
        assert_eq!(blob.len(), IV_LEN + 3 + TAG_LEN);
    }

    #[test]
    fn fresh_salt_and_iv_per_encryption() {
        let vault = CredentialVault::new();
        let a = vault.encrypt(b"same", "pw").unwrap();
        let b = vault.encrypt(b"same", "pw").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_password_fails() {
        let vault = CredentialVault::new();
        let secret = vault.encrypt(b"key", "right").unwrap();
        assert!(matches!(
            vault.decrypt(&secret, "wrong"),
            Err(VaultError::Decryption)
        ));
    }

    #[test]
    fn flipped_ciphertext_or_tag_bit_fails() {
        let vault = CredentialVault::new();
        let secret = vault.encrypt(b"key material", "pw").unwrap();
        let blob_len = Base64::decode_vec(&secret.ciphertext).unwrap().len();

        for byte in [IV_LEN, IV_LEN + 5, blob_len - 1] {
            let tampered = flip_blob_bit(&secret, byte);
            assert!(matches!(
                vault.decrypt(&tampered, "pw"),
                Err(VaultError::Decryption)
            ));
        }
    }

    #[test]
    fn iv_mismatch_fails() {
        let vault = CredentialVault::new();
        let secret = vault.encrypt(b"key", "pw").unwrap();

        let tampered = flip_blob_bit(&secret, 0);
        assert!(matches!(
            vault.decrypt(&tampered, "pw"),
            Err(VaultError::Decryption)
        ));

        let other = vault.encrypt(b"key", "pw").unwrap();
        let swapped = EncryptedSecret {
            iv: other.iv,
            ..secret
        };
        assert!(matches!(
            vault.decrypt(&swapped, "pw"),
            Err(VaultError::Decryption)
        ));
    }

    #[test]
    fn malformed_fields_are_reported() {
        let vault = CredentialVault::new();
        let secret = vault.encrypt(b"key", "pw").unwrap();

        let bad_base64 = EncryptedSecret {
            ciphertext: "not base64!".into(),
            ..secret.clone()
        };
        assert!(matches!(
            vault.decrypt(&bad_base64, "pw"),
            Err(VaultError::Malformed(_))
        ));

        let future = EncryptedSecret {
            version: 2,
            ..secret
        };
        assert!(matches!(
            vault.decrypt(&future, "pw"),
            Err(VaultError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn missing_version_defaults_to_current() {
        let json = r#"{"ciphertext":"AA==","salt":"AA==","iv":"AA=="}"#;
        let secret: EncryptedSecret = serde_json::from_str(json).unwrap();
        assert_eq!(secret.version, ENCRYPTED_SECRET_VERSION);
    }

    #[test]
    fn format_check_needs_no_password() {
        let vault = CredentialVault::new();
        let secret = vault.encrypt(b"key", "pw").unwrap();
        assert!(secret.check_format().is_ok());

        let truncated = EncryptedSecret {
            ciphertext: Base64::encode_string(&[0u8; 8]),
            ..secret
        };
        assert!(truncated.check_format().is_err());
    }
}
