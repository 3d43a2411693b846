// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted exchange key records, one per owner.
//!
//! The server never sees the plaintext key outside a signing call. What is
//! stored is the client-produced vault ciphertext plus, when the owner opts
//! into the persistent tier, their password encrypted under the server secret.

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::custody::EncryptedSecret;
use crate::storage::database::{decode, CustodyDatabase, DbError, DbResult, KEY_RECORDS};
use crate::storage::OwnedResource;

/// Stored key record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredKeyRecord {
    pub owner_user_id: String,
    /// Exchange account address derived from the key.
    pub wallet_address: String,
    /// Exchange private key encrypted under the owner's password.
    pub encrypted_key: EncryptedSecret,
    /// Owner's password encrypted under the server secret (persistent tier).
    pub encrypted_password: Option<EncryptedSecret>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OwnedResource for StoredKeyRecord {
    fn owner_user_id(&self) -> &str {
        &self.owner_user_id
    }
}

/// Public view of a key record. Carries no ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecordSummary {
    pub wallet_address: String,
    pub persistent_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&StoredKeyRecord> for KeyRecordSummary {
    fn from(record: &StoredKeyRecord) -> Self {
        Self {
            wallet_address: record.wallet_address.clone(),
            persistent_enabled: record.encrypted_password.is_some(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Repository for key records.
pub struct KeyRepository<'a> {
    db: &'a CustodyDatabase,
}

impl<'a> KeyRepository<'a> {
    pub fn new(db: &'a CustodyDatabase) -> Self {
        Self { db }
    }

    pub fn get(&self, owner_user_id: &str) -> DbResult<Option<StoredKeyRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KEY_RECORDS)?;
        match table.get(owner_user_id)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the owner's key record.
    ///
    /// Replacing a key keeps the original `created_at`.
    pub fn put(&self, record: &StoredKeyRecord) -> DbResult<StoredKeyRecord> {
        let write_txn = self.db.begin_write()?;
        let stored = {
            let mut table = write_txn.open_table(KEY_RECORDS)?;
            let existing: Option<StoredKeyRecord> = match table.get(record.owner_user_id.as_str())? {
                Some(value) => Some(decode(value.value())?),
                None => None,
            };

            let mut stored = record.clone();
            if let Some(existing) = existing {
                stored.created_at = existing.created_at;
            }
            let json = serde_json::to_vec(&stored)?;
            table.insert(stored.owner_user_id.as_str(), json.as_slice())?;
            stored
        };
        write_txn.commit()?;
        Ok(stored)
    }

    /// Set or clear the persistent-tier password ciphertext.
    pub fn set_encrypted_password(
        &self,
        owner_user_id: &str,
        encrypted_password: Option<EncryptedSecret>,
        now: DateTime<Utc>,
    ) -> DbResult<StoredKeyRecord> {
        let write_txn = self.db.begin_write()?;
        let record = {
            let mut table = write_txn.open_table(KEY_RECORDS)?;
            let mut record: StoredKeyRecord = match table.get(owner_user_id)? {
                Some(value) => decode(value.value())?,
                None => return Err(DbError::NotFound(format!("Key record for {owner_user_id}"))),
            };
            record.encrypted_password = encrypted_password;
            record.updated_at = now;

            let json = serde_json::to_vec(&record)?;
            table.insert(owner_user_id, json.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Delete the owner's key record. Returns whether one existed.
    pub fn delete(&self, owner_user_id: &str) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(KEY_RECORDS)?;
            let removed = table.remove(owner_user_id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;

    fn sample_secret(tag: &str) -> EncryptedSecret {
        EncryptedSecret {
            ciphertext: format!("ct-{tag}"),
            salt: "c2FsdA==".into(),
            iv: "aXY=".into(),
            version: 1,
        }
    }

    fn sample_record(owner: &str) -> StoredKeyRecord {
        let now = Utc::now();
        StoredKeyRecord {
            owner_user_id: owner.into(),
            wallet_address: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".into(),
            encrypted_key: sample_secret("key"),
            encrypted_password: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn put_and_get() {
        let (db, _dir) = temp_db();
        let repo = KeyRepository::new(&db);

        assert!(repo.get("user_1").unwrap().is_none());
        repo.put(&sample_record("user_1")).unwrap();

        let stored = repo.get("user_1").unwrap().unwrap();
        assert_eq!(stored.encrypted_key.ciphertext, "ct-key");
        assert!(repo.get("user_2").unwrap().is_none());
    }

    #[test]
    fn replace_keeps_created_at() {
        let (db, _dir) = temp_db();
        let repo = KeyRepository::new(&db);

        let first = repo.put(&sample_record("user_1")).unwrap();
        let mut replacement = sample_record("user_1");
        replacement.created_at = first.created_at + chrono::Duration::hours(1);
        replacement.encrypted_key = sample_secret("rotated");

        let stored = repo.put(&replacement).unwrap();
        assert_eq!(stored.created_at, first.created_at);
        assert_eq!(stored.encrypted_key.ciphertext, "ct-rotated");
    }

    #[test]
    fn set_and_clear_encrypted_password() {
        let (db, _dir) = temp_db();
        let repo = KeyRepository::new(&db);
        repo.put(&sample_record("user_1")).unwrap();

        let now = Utc::now();
        let updated = repo
            .set_encrypted_password("user_1", Some(sample_secret("pw")), now)
            .unwrap();
        assert!(KeyRecordSummary::from(&updated).persistent_enabled);

        let cleared = repo.set_encrypted_password("user_1", None, now).unwrap();
        assert!(cleared.encrypted_password.is_none());
    }

    #[test]
    fn set_password_without_record_is_not_found() {
        let (db, _dir) = temp_db();
        let repo = KeyRepository::new(&db);
        let result = repo.set_encrypted_password("ghost", None, Utc::now());
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn delete_reports_existence() {
        let (db, _dir) = temp_db();
        let repo = KeyRepository::new(&db);
        repo.put(&sample_record("user_1")).unwrap();

        assert!(repo.delete("user_1").unwrap());
        assert!(!repo.delete("user_1").unwrap());
        assert!(repo.get("user_1").unwrap().is_none());
    }
}
