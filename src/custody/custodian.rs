// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Execution-time credential resolution.
//!
//! ## Tiers
//!
//! | Tier | Source | Lifetime |
//! |------|--------|----------|
//! | C (persistent) | key record's `encrypted_password`, opened with the server secret | until the owner clears it |
//! | B (session) | newest-expiring usable session token | TTL, revocable |
//! | A (ephemeral) | caller-supplied password | one request; never seen here |
//!
//! [`SessionCustodian::get_execution_password`] tries C, then B, and
//! otherwise reports why nothing resolved. It never invents a password.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ring::rand::SystemRandom;
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use zeroize::Zeroizing;

use super::secret::{ExecutionPassword, SigningKey};
use super::token::{open_token, seal_token, SessionTokenClaims, TokenError};
use super::vault::{CredentialVault, EncryptedSecret, VaultError};
use crate::storage::{
    run_blocking, CustodyDatabase, DbError, KeyRepository, SessionRepository, SessionSummary, StoredKeyRecord,
    StoredSession,
};

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;
pub const MIN_SESSION_TTL_SECS: i64 = 5 * 60;
pub const MAX_SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

// =============================================================================
// Resolution Types
// =============================================================================

/// Which tier supplied (or would supply) a password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CredentialTier {
    Persistent,
    Session,
    None,
}

/// Why no tier resolved a password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NoCredentialReason {
    /// The owner has no sessions at all.
    NoSession,
    /// Sessions exist but all have passed their expiry.
    SessionExpired,
    /// Sessions exist but all unexpired ones are revoked.
    SessionRevoked,
    /// The best session's token could not be decoded.
    TokenCorrupt,
    /// The token decoded to a different owner.
    TokenOwnerMismatch,
}

impl fmt::Display for NoCredentialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::NoSession => "no execution session",
            Self::SessionExpired => "execution session expired",
            Self::SessionRevoked => "execution session revoked",
            Self::TokenCorrupt => "execution session token corrupt",
            Self::TokenOwnerMismatch => "execution session token belongs to another owner",
        };
        f.write_str(message)
    }
}

/// Outcome of [`SessionCustodian::get_execution_password`].
#[derive(Debug)]
pub enum PasswordResolution {
    Persistent {
        password: ExecutionPassword,
    },
    Session {
        session_id: String,
        password: ExecutionPassword,
        expires_at: DateTime<Utc>,
    },
    Unavailable {
        reason: NoCredentialReason,
    },
}

impl PasswordResolution {
    pub fn tier(&self) -> CredentialTier {
        match self {
            Self::Persistent { .. } => CredentialTier::Persistent,
            Self::Session { .. } => CredentialTier::Session,
            Self::Unavailable { .. } => CredentialTier::None,
        }
    }

    pub fn password(&self) -> Option<&ExecutionPassword> {
        match self {
            Self::Persistent { password } | Self::Session { password, .. } => Some(password),
            Self::Unavailable { .. } => None,
        }
    }

    /// Take the password, or the reason there is none.
    pub fn into_password(self) -> Result<ExecutionPassword, NoCredentialReason> {
        match self {
            Self::Persistent { password } | Self::Session { password, .. } => Ok(password),
            Self::Unavailable { reason } => Err(reason),
        }
    }
}

/// Credential overview for display. Nothing is decrypted to build it.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub has_key: bool,
    pub persistent_enabled: bool,
    pub persistent_available: bool,
    /// Tier that resolution would try first to succeed with.
    pub tier: CredentialTier,
    pub active_session: Option<SessionSummary>,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("no key record stored for this owner")]
    NoKeyRecord,

    #[error("password does not unlock the stored key")]
    WrongPassword,

    #[error("stored key could not be read: {0}")]
    Vault(VaultError),

    #[error("session ttl must be between {min} and {max} seconds")]
    InvalidTtl { min: i64, max: i64 },

    #[error("persistent credential tier is not configured on this server")]
    PersistentTierUnavailable,

    #[error("session not found")]
    SessionNotFound,

    #[error("session already revoked")]
    SessionRevoked,

    #[error(transparent)]
    Token(#[from] TokenError),
}

// =============================================================================
// SessionCustodian
// =============================================================================

/// Resolves execution passwords and manages sessions and the persistent tier.
pub struct SessionCustodian {
    db: Arc<CustodyDatabase>,
    vault: CredentialVault,
    persistent_secret: Option<Zeroizing<String>>,
    rng: SystemRandom,
}

impl SessionCustodian {
    /// `persistent_secret` is the server-held Tier C secret; `None` disables
    /// Tier C entirely.
    pub fn new(db: Arc<CustodyDatabase>, persistent_secret: Option<String>) -> Self {
        Self {
            db,
            vault: CredentialVault::new(),
            persistent_secret: persistent_secret
                .filter(|s| !s.is_empty())
                .map(Zeroizing::new),
            rng: SystemRandom::new(),
        }
    }

    pub fn persistent_tier_configured(&self) -> bool {
        self.persistent_secret.is_some()
    }

    /// Run `op` against this custodian on the blocking pool.
    ///
    /// Async callers go through here for anything that derives a key or
    /// commits to the database.
    pub async fn blocking<T, F>(self: &Arc<Self>, op: F) -> Result<T, CustodyError>
    where
        F: FnOnce(&SessionCustodian) -> Result<T, CustodyError> + Send + 'static,
        T: Send + 'static,
    {
        let custodian = Arc::clone(self);
        run_blocking(move || op(&custodian)).await
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve an execution password for `owner`, Tier C before Tier B.
    pub fn get_execution_password(&self, owner: &str) -> Result<PasswordResolution, CustodyError> {
        self.resolve_at(owner, Utc::now())
    }

    pub(crate) fn resolve_at(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<PasswordResolution, CustodyError> {
        if let Some(password) = self.resolve_persistent(owner)? {
            debug!(owner = %owner, "Resolved execution password from persistent tier");
            return Ok(PasswordResolution::Persistent { password });
        }
        self.resolve_session(owner, now)
    }

    fn resolve_persistent(&self, owner: &str) -> Result<Option<ExecutionPassword>, CustodyError> {
        let Some(server_secret) = &self.persistent_secret else {
            return Ok(None);
        };
        let Some(encrypted) = KeyRepository::new(&self.db)
            .get(owner)?
            .and_then(|record| record.encrypted_password)
        else {
            return Ok(None);
        };

        match self.vault.decrypt(&encrypted, server_secret) {
            Ok(plaintext) => match std::str::from_utf8(&plaintext) {
                Ok(text) => Ok(Some(ExecutionPassword::new(text))),
                Err(_) => {
                    warn!(owner = %owner, "Persistent secret is not valid UTF-8, falling back to session tier");
                    Ok(None)
                }
            },
            Err(e) => {
                warn!(owner = %owner, error = %e, "Persistent secret unreadable, falling back to session tier");
                Ok(None)
            }
        }
    }

    fn resolve_session(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<PasswordResolution, CustodyError> {
        let repo = SessionRepository::new(&self.db);
        let sessions = repo.list_by_owner(owner)?;

        let Some(session) = sessions
            .iter()
            .filter(|s| s.is_usable_at(now))
            .max_by_key(|s| s.expires_at)
        else {
            let reason = if sessions.is_empty() {
                NoCredentialReason::NoSession
            } else if sessions.iter().any(|s| !s.revoked) {
                NoCredentialReason::SessionExpired
            } else {
                NoCredentialReason::SessionRevoked
            };
            return Ok(PasswordResolution::Unavailable { reason });
        };

        let claims = match open_token(&session.encrypted_token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(owner = %owner, session_id = %session.id, error = %e, "Session token rejected");
                return Ok(PasswordResolution::Unavailable {
                    reason: NoCredentialReason::TokenCorrupt,
                });
            }
        };

        if claims.owner != owner {
            warn!(owner = %owner, session_id = %session.id, "Session token owner mismatch");
            return Ok(PasswordResolution::Unavailable {
                reason: NoCredentialReason::TokenOwnerMismatch,
            });
        }
        if claims.expires_at <= now {
            return Ok(PasswordResolution::Unavailable {
                reason: NoCredentialReason::SessionExpired,
            });
        }

        // Re-checks revocation inside the write, so a revoke that raced this
        // lookup still wins. Storage failures here don't block the caller.
        match repo.record_use(&session.id, now) {
            Ok(true) => {}
            Ok(false) => {
                return Ok(PasswordResolution::Unavailable {
                    reason: NoCredentialReason::SessionRevoked,
                })
            }
            Err(e) => warn!(session_id = %session.id, error = %e, "Failed to record session use"),
        }

        debug!(owner = %owner, session_id = %session.id, "Resolved execution password from session tier");
        Ok(PasswordResolution::Session {
            session_id: session.id.clone(),
            password: claims.password,
            expires_at: session.expires_at,
        })
    }

    // =========================================================================
    // Key verification
    // =========================================================================

    fn key_record(&self, owner: &str) -> Result<StoredKeyRecord, CustodyError> {
        KeyRepository::new(&self.db)
            .get(owner)?
            .ok_or(CustodyError::NoKeyRecord)
    }

    /// Check that `password` unlocks the owner's stored key.
    pub fn verify_password(
        &self,
        record: &StoredKeyRecord,
        password: &ExecutionPassword,
    ) -> Result<(), CustodyError> {
        let plaintext = self
            .vault
            .decrypt(&record.encrypted_key, password.expose())
            .map_err(|e| match e {
                VaultError::Decryption => CustodyError::WrongPassword,
                other => CustodyError::Vault(other),
            })?;
        SigningKey::from_decrypted(&plaintext).map_err(|_| CustodyError::WrongPassword)?;
        Ok(())
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Open a session after checking the password against the stored key.
    pub fn create_session(
        &self,
        owner: &str,
        password: &ExecutionPassword,
        ttl: Duration,
    ) -> Result<StoredSession, CustodyError> {
        let ttl_secs = ttl.num_seconds();
        if !(MIN_SESSION_TTL_SECS..=MAX_SESSION_TTL_SECS).contains(&ttl_secs) {
            return Err(CustodyError::InvalidTtl {
                min: MIN_SESSION_TTL_SECS,
                max: MAX_SESSION_TTL_SECS,
            });
        }

        let record = self.key_record(owner)?;
        self.verify_password(&record, password)?;

        let now = Utc::now();
        let expires_at = now + ttl;
        let claims = SessionTokenClaims {
            owner: owner.to_string(),
            password: ExecutionPassword::new(password.expose()),
            expires_at,
        };
        let token = seal_token(&claims, &self.rng)?;

        let session = StoredSession::new(owner, token, now, expires_at);
        SessionRepository::new(&self.db).create(&session)?;

        info!(owner = %owner, session_id = %session.id, expires_at = %expires_at, "Execution session created");
        Ok(session)
    }

    pub fn list_sessions(&self, owner: &str) -> Result<Vec<StoredSession>, CustodyError> {
        Ok(SessionRepository::new(&self.db).list_by_owner(owner)?)
    }

    pub fn get_session(&self, session_id: &str) -> Result<StoredSession, CustodyError> {
        SessionRepository::new(&self.db)
            .get(session_id)
            .map_err(|e| match e {
                DbError::NotFound(_) => CustodyError::SessionNotFound,
                other => CustodyError::Db(other),
            })
    }

    /// Revoke a session. Takes effect for every later resolution.
    pub fn revoke_session(&self, session_id: &str) -> Result<StoredSession, CustodyError> {
        if self.get_session(session_id)?.revoked {
            return Err(CustodyError::SessionRevoked);
        }
        let session = SessionRepository::new(&self.db)
            .revoke(session_id, Utc::now())
            .map_err(|e| match e {
                DbError::NotFound(_) => CustodyError::SessionNotFound,
                other => CustodyError::Db(other),
            })?;
        info!(owner = %session.owner_user_id, session_id = %session_id, "Execution session revoked");
        Ok(session)
    }

    pub fn revoke_all_sessions(&self, owner: &str) -> Result<usize, CustodyError> {
        let revoked = SessionRepository::new(&self.db).revoke_all_for_owner(owner, Utc::now())?;
        info!(owner = %owner, revoked, "All execution sessions revoked");
        Ok(revoked)
    }

    /// Delete sessions revoked or expired longer than `retention` ago.
    pub fn cleanup_sessions(&self, retention: Duration) -> Result<usize, CustodyError> {
        Ok(SessionRepository::new(&self.db).cleanup(Utc::now(), retention)?)
    }

    // =========================================================================
    // Key records
    // =========================================================================

    /// Store or replace the owner's encrypted key.
    ///
    /// A replaced key invalidates every credential tied to the old one: the
    /// persistent password is cleared and all sessions are revoked.
    pub fn store_key(
        &self,
        owner: &str,
        wallet_address: &str,
        encrypted_key: EncryptedSecret,
    ) -> Result<StoredKeyRecord, CustodyError> {
        let now = Utc::now();
        let record = StoredKeyRecord {
            owner_user_id: owner.to_string(),
            wallet_address: wallet_address.to_string(),
            encrypted_key,
            encrypted_password: None,
            created_at: now,
            updated_at: now,
        };
        let stored = KeyRepository::new(&self.db).put(&record)?;
        let revoked = SessionRepository::new(&self.db).revoke_all_for_owner(owner, now)?;
        info!(owner = %owner, wallet_address = %wallet_address, revoked, "Exchange key stored");
        Ok(stored)
    }

    /// Delete the owner's key and every session that could unlock it.
    pub fn delete_key(&self, owner: &str) -> Result<(), CustodyError> {
        if !KeyRepository::new(&self.db).delete(owner)? {
            return Err(CustodyError::NoKeyRecord);
        }
        let deleted = SessionRepository::new(&self.db).delete_all_for_owner(owner)?;
        info!(owner = %owner, sessions_deleted = deleted, "Exchange key deleted");
        Ok(())
    }

    // =========================================================================
    // Persistent tier
    // =========================================================================

    /// Store the owner's password under the server secret.
    pub fn enable_persistent(
        &self,
        owner: &str,
        password: &ExecutionPassword,
    ) -> Result<StoredKeyRecord, CustodyError> {
        let Some(server_secret) = &self.persistent_secret else {
            return Err(CustodyError::PersistentTierUnavailable);
        };
        let record = self.key_record(owner)?;
        self.verify_password(&record, password)?;

        let encrypted = self
            .vault
            .encrypt(password.expose().as_bytes(), server_secret)
            .map_err(CustodyError::Vault)?;
        let updated = KeyRepository::new(&self.db).set_encrypted_password(
            owner,
            Some(encrypted),
            Utc::now(),
        )?;
        info!(owner = %owner, "Persistent execution credential enabled");
        Ok(updated)
    }

    pub fn disable_persistent(&self, owner: &str) -> Result<StoredKeyRecord, CustodyError> {
        let updated = KeyRepository::new(&self.db)
            .set_encrypted_password(owner, None, Utc::now())
            .map_err(|e| match e {
                DbError::NotFound(_) => CustodyError::NoKeyRecord,
                other => CustodyError::Db(other),
            })?;
        info!(owner = %owner, "Persistent execution credential disabled");
        Ok(updated)
    }

    /// Summarise which tier would resolve, without decrypting anything.
    pub fn credential_status(&self, owner: &str) -> Result<CredentialStatus, CustodyError> {
        let now = Utc::now();
        let record = KeyRepository::new(&self.db).get(owner)?;
        let persistent_enabled = record
            .as_ref()
            .is_some_and(|r| r.encrypted_password.is_some());
        let persistent_available = persistent_enabled && self.persistent_tier_configured();

        let sessions = SessionRepository::new(&self.db).list_by_owner(owner)?;
        let active_session = sessions
            .iter()
            .filter(|s| s.is_usable_at(now))
            .max_by_key(|s| s.expires_at)
            .map(SessionSummary::from);

        let tier = if persistent_available {
            CredentialTier::Persistent
        } else if active_session.is_some() {
            CredentialTier::Session
        } else {
            CredentialTier::None
        };

        Ok(CredentialStatus {
            has_key: record.is_some(),
            persistent_enabled,
            persistent_available,
            tier,
            active_session,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::custody::secret::tests::TEST_KEY_HEX;
    use crate::storage::test_support::temp_db;
    use tempfile::TempDir;

    pub(crate) const OWNER: &str = "user_1";
    pub(crate) const PASSWORD: &str = "correct horse battery staple";
    pub(crate) const SERVER_SECRET: &str = "server-held-secret";

    /// Store an encrypted test key for `owner` under [`PASSWORD`].
    pub(crate) fn store_key(db: &CustodyDatabase, owner: &str) -> StoredKeyRecord {
        let vault = CredentialVault::new();
        let now = Utc::now();
        let record = StoredKeyRecord {
            owner_user_id: owner.into(),
            wallet_address: crate::custody::secret::tests::TEST_KEY_ADDRESS.into(),
            encrypted_key: vault.encrypt(TEST_KEY_HEX.as_bytes(), PASSWORD).unwrap(),
            encrypted_password: None,
            created_at: now,
            updated_at: now,
        };
        KeyRepository::new(db).put(&record).unwrap()
    }

    fn setup(server_secret: Option<&str>) -> (SessionCustodian, Arc<CustodyDatabase>, TempDir) {
        let (db, dir) = temp_db();
        store_key(&db, OWNER);
        let custodian = SessionCustodian::new(db.clone(), server_secret.map(str::to_string));
        (custodian, db, dir)
    }

    fn password() -> ExecutionPassword {
        ExecutionPassword::new(PASSWORD)
    }

    #[test]
    fn no_credentials_reports_no_session() {
        let (custodian, _db, _dir) = setup(Some(SERVER_SECRET));
        let resolution = custodian.get_execution_password(OWNER).unwrap();
        assert!(matches!(
            resolution,
            PasswordResolution::Unavailable {
                reason: NoCredentialReason::NoSession
            }
        ));
        assert_eq!(resolution.tier(), CredentialTier::None);
    }

    #[test]
    fn session_tier_resolves_and_records_use() {
        let (custodian, db, _dir) = setup(None);
        let session = custodian
            .create_session(OWNER, &password(), Duration::hours(1))
            .unwrap();

        let resolution = custodian.get_execution_password(OWNER).unwrap();
        assert_eq!(resolution.tier(), CredentialTier::Session);
        assert_eq!(resolution.password().unwrap().expose(), PASSWORD);

        let stored = SessionRepository::new(&db).get(&session.id).unwrap();
        assert_eq!(stored.use_count, 1);
        assert!(stored.last_used_at.is_some());
    }

    #[test]
    fn persistent_tier_takes_precedence_over_session() {
        let (custodian, _db, _dir) = setup(Some(SERVER_SECRET));
        custodian
            .create_session(OWNER, &password(), Duration::hours(1))
            .unwrap();
        custodian.enable_persistent(OWNER, &password()).unwrap();

        let resolution = custodian.get_execution_password(OWNER).unwrap();
        assert_eq!(resolution.tier(), CredentialTier::Persistent);
        assert_eq!(resolution.into_password().unwrap().expose(), PASSWORD);
    }

    #[test]
    fn persistent_record_ignored_without_server_secret() {
        let (db, _dir) = temp_db();
        store_key(&db, OWNER);
        let with_secret = SessionCustodian::new(db.clone(), Some(SERVER_SECRET.into()));
        with_secret.enable_persistent(OWNER, &password()).unwrap();

        let without_secret = SessionCustodian::new(db.clone(), None);
        let resolution = without_secret.get_execution_password(OWNER).unwrap();
        assert_eq!(resolution.tier(), CredentialTier::None);
        assert!(matches!(
            without_secret.enable_persistent(OWNER, &password()),
            Err(CustodyError::PersistentTierUnavailable)
        ));
    }

    #[test]
    fn unreadable_persistent_secret_falls_back_to_session() {
        let (db, _dir) = temp_db();
        store_key(&db, OWNER);
        SessionCustodian::new(db.clone(), Some(SERVER_SECRET.into()))
            .enable_persistent(OWNER, &password())
            .unwrap();

        let rotated = SessionCustodian::new(db.clone(), Some("rotated-secret".into()));
        rotated
            .create_session(OWNER, &password(), Duration::hours(1))
            .unwrap();
        let resolution = rotated.get_execution_password(OWNER).unwrap();
        assert_eq!(resolution.tier(), CredentialTier::Session);
    }

    #[test]
    fn disable_persistent_returns_to_session_tier() {
        let (custodian, _db, _dir) = setup(Some(SERVER_SECRET));
        custodian.enable_persistent(OWNER, &password()).unwrap();
        custodian.disable_persistent(OWNER).unwrap();

        let resolution = custodian.get_execution_password(OWNER).unwrap();
        assert_eq!(resolution.tier(), CredentialTier::None);
    }

    #[test]
    fn wrong_password_cannot_open_session_or_persist() {
        let (custodian, _db, _dir) = setup(Some(SERVER_SECRET));
        let wrong = ExecutionPassword::new("nope");
        assert!(matches!(
            custodian.create_session(OWNER, &wrong, Duration::hours(1)),
            Err(CustodyError::WrongPassword)
        ));
        assert!(matches!(
            custodian.enable_persistent(OWNER, &wrong),
            Err(CustodyError::WrongPassword)
        ));
    }

    #[test]
    fn session_requires_key_record_and_valid_ttl() {
        let (custodian, _db, _dir) = setup(None);
        assert!(matches!(
            custodian.create_session("ghost", &password(), Duration::hours(1)),
            Err(CustodyError::NoKeyRecord)
        ));
        assert!(matches!(
            custodian.create_session(OWNER, &password(), Duration::minutes(1)),
            Err(CustodyError::InvalidTtl { .. })
        ));
        assert!(matches!(
            custodian.create_session(OWNER, &password(), Duration::days(8)),
            Err(CustodyError::InvalidTtl { .. })
        ));
    }

    #[test]
    fn expired_session_is_never_valid() {
        let (custodian, _db, _dir) = setup(None);
        let session = custodian
            .create_session(OWNER, &password(), Duration::minutes(10))
            .unwrap();

        let later = session.expires_at + Duration::seconds(1);
        let resolution = custodian.resolve_at(OWNER, later).unwrap();
        assert!(matches!(
            resolution,
            PasswordResolution::Unavailable {
                reason: NoCredentialReason::SessionExpired
            }
        ));
        let at_expiry = custodian.resolve_at(OWNER, session.expires_at).unwrap();
        assert_eq!(at_expiry.tier(), CredentialTier::None);
    }

    #[test]
    fn revoked_session_fails_closed_immediately() {
        let (custodian, _db, _dir) = setup(None);
        let session = custodian
            .create_session(OWNER, &password(), Duration::hours(1))
            .unwrap();
        assert_eq!(
            custodian.get_execution_password(OWNER).unwrap().tier(),
            CredentialTier::Session
        );

        custodian.revoke_session(&session.id).unwrap();
        let resolution = custodian.get_execution_password(OWNER).unwrap();
        assert!(matches!(
            resolution,
            PasswordResolution::Unavailable {
                reason: NoCredentialReason::SessionRevoked
            }
        ));
    }

    #[test]
    fn latest_expiring_session_wins() {
        let (custodian, db, _dir) = setup(None);
        let short = custodian
            .create_session(OWNER, &password(), Duration::hours(1))
            .unwrap();
        let long = custodian
            .create_session(OWNER, &password(), Duration::hours(5))
            .unwrap();

        match custodian.get_execution_password(OWNER).unwrap() {
            PasswordResolution::Session { session_id, .. } => assert_eq!(session_id, long.id),
            other => panic!("expected session tier, got {other:?}"),
        }
        let untouched = SessionRepository::new(&db).get(&short.id).unwrap();
        assert_eq!(untouched.use_count, 0);
    }

    #[test]
    fn corrupt_token_is_reported_without_secret() {
        let (custodian, db, _dir) = setup(None);
        let now = Utc::now();
        let session = StoredSession::new(OWNER, "bm90IGEgdG9rZW4=".into(), now, now + Duration::hours(1));
        SessionRepository::new(&db).create(&session).unwrap();

        let resolution = custodian.get_execution_password(OWNER).unwrap();
        assert!(matches!(
            resolution,
            PasswordResolution::Unavailable {
                reason: NoCredentialReason::TokenCorrupt
            }
        ));
    }

    #[test]
    fn substituted_token_is_rejected() {
        let (custodian, db, _dir) = setup(None);
        store_key(&db, "user_2");
        let foreign = custodian
            .create_session("user_2", &password(), Duration::hours(1))
            .unwrap();

        let now = Utc::now();
        let planted = StoredSession::new(OWNER, foreign.encrypted_token, now, now + Duration::hours(1));
        SessionRepository::new(&db).create(&planted).unwrap();

        let resolution = custodian.get_execution_password(OWNER).unwrap();
        assert!(matches!(
            resolution,
            PasswordResolution::Unavailable {
                reason: NoCredentialReason::TokenOwnerMismatch
            }
        ));
    }

    #[test]
    fn credential_status_reports_tier_without_decrypting() {
        let (custodian, _db, _dir) = setup(Some(SERVER_SECRET));
        let status = custodian.credential_status(OWNER).unwrap();
        assert!(status.has_key);
        assert_eq!(status.tier, CredentialTier::None);

        custodian
            .create_session(OWNER, &password(), Duration::hours(1))
            .unwrap();
        let status = custodian.credential_status(OWNER).unwrap();
        assert_eq!(status.tier, CredentialTier::Session);
        assert!(status.active_session.is_some());

        custodian.enable_persistent(OWNER, &password()).unwrap();
        let status = custodian.credential_status(OWNER).unwrap();
        assert_eq!(status.tier, CredentialTier::Persistent);
    }

    #[test]
    fn revoke_all_and_cleanup() {
        let (custodian, _db, _dir) = setup(None);
        custodian
            .create_session(OWNER, &password(), Duration::hours(1))
            .unwrap();
        custodian
            .create_session(OWNER, &password(), Duration::hours(2))
            .unwrap();

        assert_eq!(custodian.revoke_all_sessions(OWNER).unwrap(), 2);
        assert_eq!(custodian.cleanup_sessions(Duration::hours(24)).unwrap(), 2);
        assert!(custodian.list_sessions(OWNER).unwrap().is_empty());
    }

    #[test]
    fn replacing_key_clears_persistent_and_revokes_sessions() {
        let (custodian, _db, _dir) = setup(Some(SERVER_SECRET));
        custodian
            .create_session(OWNER, &password(), Duration::hours(1))
            .unwrap();
        custodian.enable_persistent(OWNER, &password()).unwrap();

        let vault = CredentialVault::new();
        let replacement = vault.encrypt(TEST_KEY_HEX.as_bytes(), "new password").unwrap();
        let stored = custodian
            .store_key(OWNER, crate::custody::secret::tests::TEST_KEY_ADDRESS, replacement)
            .unwrap();

        assert!(stored.encrypted_password.is_none());
        assert!(custodian.list_sessions(OWNER).unwrap().iter().all(|s| s.revoked));
        assert!(matches!(
            custodian.get_execution_password(OWNER).unwrap(),
            PasswordResolution::Unavailable { .. }
        ));
    }

    #[test]
    fn deleting_key_removes_sessions() {
        let (custodian, _db, _dir) = setup(None);
        custodian
            .create_session(OWNER, &password(), Duration::hours(1))
            .unwrap();

        custodian.delete_key(OWNER).unwrap();
        assert!(custodian.list_sessions(OWNER).unwrap().is_empty());
        assert!(!custodian.credential_status(OWNER).unwrap().has_key);
        assert!(matches!(custodian.delete_key(OWNER), Err(CustodyError::NoKeyRecord)));
    }

    #[test]
    fn revoking_twice_reports_conflict() {
        let (custodian, _db, _dir) = setup(None);
        let session = custodian
            .create_session(OWNER, &password(), Duration::hours(1))
            .unwrap();
        custodian.revoke_session(&session.id).unwrap();
        assert!(matches!(
            custodian.revoke_session(&session.id),
            Err(CustodyError::SessionRevoked)
        ));
        assert!(matches!(
            custodian.revoke_session("missing"),
            Err(CustodyError::SessionNotFound)
        ));
    }
}
