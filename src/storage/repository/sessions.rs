// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custodial session records.
//!
//! A session row holds an opaque token that wraps the owner's execution
//! password. The token is secret-equivalent, so `StoredSession` redacts it in
//! `Debug` and is never serialized to API clients; handlers return
//! [`SessionSummary`] instead.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{
    decode, owner_key, owner_range, CustodyDatabase, DbError, DbResult, OWNER_SESSIONS, SESSIONS,
};
use crate::storage::OwnedResource;

/// Stored custodial session.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredSession {
    pub id: String,
    pub owner_user_id: String,
    /// Opaque token produced by `custody::token::seal_token`.
    pub encrypted_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub use_count: u64,
}

impl StoredSession {
    pub fn new(
        owner_user_id: impl Into<String>,
        encrypted_token: String,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_user_id: owner_user_id.into(),
            encrypted_token,
            created_at,
            expires_at,
            revoked: false,
            revoked_at: None,
            last_used_at: None,
            use_count: 0,
        }
    }

    /// Valid iff not revoked and strictly before expiry.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

impl fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredSession")
            .field("id", &self.id)
            .field("owner_user_id", &self.owner_user_id)
            .field("encrypted_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("revoked", &self.revoked)
            .field("use_count", &self.use_count)
            .finish()
    }
}

impl OwnedResource for StoredSession {
    fn owner_user_id(&self) -> &str {
        &self.owner_user_id
    }
}

/// Public view of a session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub use_count: u64,
}

impl From<&StoredSession> for SessionSummary {
    fn from(session: &StoredSession) -> Self {
        Self {
            id: session.id.clone(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            revoked: session.revoked,
            revoked_at: session.revoked_at,
            last_used_at: session.last_used_at,
            use_count: session.use_count,
        }
    }
}

/// Repository for session records.
pub struct SessionRepository<'a> {
    db: &'a CustodyDatabase,
}

impl<'a> SessionRepository<'a> {
    pub fn new(db: &'a CustodyDatabase) -> Self {
        Self { db }
    }

    pub fn create(&self, session: &StoredSession) -> DbResult<()> {
        let json = serde_json::to_vec(session)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            if sessions.get(session.id.as_str())?.is_some() {
                return Err(DbError::AlreadyExists(format!("Session {}", session.id)));
            }
            sessions.insert(session.id.as_str(), json.as_slice())?;

            let mut index = write_txn.open_table(OWNER_SESSIONS)?;
            let key = owner_key(&session.owner_user_id, &session.id);
            index.insert(key.as_str(), session.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> DbResult<StoredSession> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        match table.get(session_id)? {
            Some(value) => decode(value.value()),
            None => Err(DbError::NotFound(format!("Session {session_id}"))),
        }
    }

    /// All sessions of an owner, revoked and expired ones included.
    pub fn list_by_owner(&self, owner_user_id: &str) -> DbResult<Vec<StoredSession>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(OWNER_SESSIONS)?;
        let sessions = read_txn.open_table(SESSIONS)?;

        let (start, end) = owner_range(owner_user_id);
        let mut result = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())? {
            let (_, session_id) = entry?;
            if let Some(value) = sessions.get(session_id.value())? {
                result.push(decode::<StoredSession>(value.value())?);
            }
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    /// Mark a session revoked. Revoking twice keeps the first `revoked_at`.
    pub fn revoke(&self, session_id: &str, now: DateTime<Utc>) -> DbResult<StoredSession> {
        let write_txn = self.db.begin_write()?;
        let session = {
            let mut table = write_txn.open_table(SESSIONS)?;
            let mut session: StoredSession = match table.get(session_id)? {
                Some(value) => decode(value.value())?,
                None => return Err(DbError::NotFound(format!("Session {session_id}"))),
            };
            if !session.revoked {
                session.revoked = true;
                session.revoked_at = Some(now);
                let json = serde_json::to_vec(&session)?;
                table.insert(session_id, json.as_slice())?;
            }
            session
        };
        write_txn.commit()?;
        Ok(session)
    }

    /// Revoke every active session of an owner in one transaction.
    pub fn revoke_all_for_owner(&self, owner_user_id: &str, now: DateTime<Utc>) -> DbResult<usize> {
        let ids = self.owner_session_ids(owner_user_id)?;
        let write_txn = self.db.begin_write()?;
        let mut revoked = 0;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            for id in &ids {
                let session: Option<StoredSession> = match table.get(id.as_str())? {
                    Some(value) => Some(decode(value.value())?),
                    None => None,
                };
                let Some(mut session) = session else { continue };
                if session.revoked {
                    continue;
                }
                session.revoked = true;
                session.revoked_at = Some(now);
                let json = serde_json::to_vec(&session)?;
                table.insert(id.as_str(), json.as_slice())?;
                revoked += 1;
            }
        }
        write_txn.commit()?;
        Ok(revoked)
    }

    /// Record one use of a session.
    ///
    /// Returns `false`, writing nothing, when the session is gone, revoked or
    /// expired at `now`.
    pub fn record_use(&self, session_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let usable = {
            let mut table = write_txn.open_table(SESSIONS)?;
            let session: Option<StoredSession> = match table.get(session_id)? {
                Some(value) => Some(decode(value.value())?),
                None => None,
            };
            match session {
                Some(mut session) if session.is_usable_at(now) => {
                    session.last_used_at = Some(now);
                    session.use_count += 1;
                    let json = serde_json::to_vec(&session)?;
                    table.insert(session_id, json.as_slice())?;
                    true
                }
                _ => false,
            }
        };
        write_txn.commit()?;
        Ok(usable)
    }

    /// Delete every session of an owner. Returns how many were removed.
    pub fn delete_all_for_owner(&self, owner_user_id: &str) -> DbResult<usize> {
        let ids = self.owner_session_ids(owner_user_id)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            let mut index = write_txn.open_table(OWNER_SESSIONS)?;
            for id in &ids {
                sessions.remove(id.as_str())?;
                index.remove(owner_key(owner_user_id, id).as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(ids.len())
    }

    /// Physically delete sessions that were revoked, or expired longer than
    /// `retention` ago.
    pub fn cleanup(&self, now: DateTime<Utc>, retention: Duration) -> DbResult<usize> {
        let stale: Vec<(String, String)> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SESSIONS)?;
            let mut stale = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let session: StoredSession = decode(value.value())?;
                let expired_long_ago = session
                    .expires_at
                    .checked_add_signed(retention)
                    .is_some_and(|cutoff| cutoff <= now);
                if session.revoked || expired_long_ago {
                    stale.push((session.id, session.owner_user_id));
                }
            }
            stale
        };

        if stale.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            let mut index = write_txn.open_table(OWNER_SESSIONS)?;
            for (id, owner) in &stale {
                sessions.remove(id.as_str())?;
                index.remove(owner_key(owner, id).as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(stale.len())
    }

    fn owner_session_ids(&self, owner_user_id: &str) -> DbResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(OWNER_SESSIONS)?;
        let (start, end) = owner_range(owner_user_id);
        let mut ids = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())? {
            let (_, session_id) = entry?;
            ids.push(session_id.value().to_string());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;

    fn session(owner: &str, now: DateTime<Utc>, ttl_minutes: i64) -> StoredSession {
        StoredSession::new(
            owner,
            "opaque-token".into(),
            now,
            now + Duration::minutes(ttl_minutes),
        )
    }

    #[test]
    fn create_get_and_list() {
        let (db, _dir) = temp_db();
        let repo = SessionRepository::new(&db);
        let now = Utc::now();

        let a = session("user_1", now, 60);
        let b = session("user_1", now + Duration::seconds(1), 60);
        let other = session("user_2", now, 60);
        repo.create(&a).unwrap();
        repo.create(&b).unwrap();
        repo.create(&other).unwrap();

        assert_eq!(repo.get(&a.id).unwrap(), a);
        let listed = repo.list_by_owner("user_1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id, "newest first");
        assert!(matches!(repo.get("missing"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn usable_window_is_strict_at_expiry() {
        let now = Utc::now();
        let s = session("user_1", now, 10);
        assert!(s.is_usable_at(now));
        assert!(!s.is_usable_at(s.expires_at));
        assert!(!s.is_usable_at(s.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn revoke_is_idempotent() {
        let (db, _dir) = temp_db();
        let repo = SessionRepository::new(&db);
        let now = Utc::now();
        let s = session("user_1", now, 60);
        repo.create(&s).unwrap();

        let first = repo.revoke(&s.id, now).unwrap();
        let second = repo.revoke(&s.id, now + Duration::minutes(5)).unwrap();
        assert!(first.revoked);
        assert_eq!(second.revoked_at, Some(now));
        assert!(!second.is_usable_at(now));
    }

    #[test]
    fn revoke_all_only_touches_owner() {
        let (db, _dir) = temp_db();
        let repo = SessionRepository::new(&db);
        let now = Utc::now();
        repo.create(&session("user_1", now, 60)).unwrap();
        repo.create(&session("user_1", now, 60)).unwrap();
        let other = session("user_2", now, 60);
        repo.create(&other).unwrap();

        assert_eq!(repo.revoke_all_for_owner("user_1", now).unwrap(), 2);
        assert_eq!(repo.revoke_all_for_owner("user_1", now).unwrap(), 0);
        assert!(!repo.get(&other.id).unwrap().revoked);
    }

    #[test]
    fn owner_ids_containing_separator_do_not_overlap() {
        let (db, _dir) = temp_db();
        let repo = SessionRepository::new(&db);
        let now = Utc::now();
        let own = session("user_1", now, 60);
        let lookalike = session("user_1|x", now, 60);
        repo.create(&own).unwrap();
        repo.create(&lookalike).unwrap();

        let listed = repo.list_by_owner("user_1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, own.id);

        assert_eq!(repo.revoke_all_for_owner("user_1", now).unwrap(), 1);
        assert!(!repo.get(&lookalike.id).unwrap().revoked);

        assert_eq!(repo.delete_all_for_owner("user_1").unwrap(), 1);
        assert_eq!(repo.list_by_owner("user_1|x").unwrap().len(), 1);
    }

    #[test]
    fn record_use_refuses_revoked_and_expired() {
        let (db, _dir) = temp_db();
        let repo = SessionRepository::new(&db);
        let now = Utc::now();
        let s = session("user_1", now, 10);
        repo.create(&s).unwrap();

        assert!(repo.record_use(&s.id, now).unwrap());
        let stored = repo.get(&s.id).unwrap();
        assert_eq!(stored.use_count, 1);
        assert_eq!(stored.last_used_at, Some(now));

        assert!(!repo.record_use(&s.id, s.expires_at).unwrap());
        repo.revoke(&s.id, now).unwrap();
        assert!(!repo.record_use(&s.id, now).unwrap());
        assert!(!repo.record_use("missing", now).unwrap());
        assert_eq!(repo.get(&s.id).unwrap().use_count, 1);
    }

    #[test]
    fn cleanup_removes_revoked_and_long_expired() {
        let (db, _dir) = temp_db();
        let repo = SessionRepository::new(&db);
        let now = Utc::now();

        let active = session("user_1", now, 60);
        let revoked = session("user_1", now, 60);
        let recently_expired = session("user_1", now - Duration::hours(2), 60);
        let long_expired = session("user_1", now - Duration::hours(30), 60);
        for s in [&active, &revoked, &recently_expired, &long_expired] {
            repo.create(s).unwrap();
        }
        repo.revoke(&revoked.id, now).unwrap();

        let removed = repo.cleanup(now, Duration::hours(24)).unwrap();
        assert_eq!(removed, 2);

        let remaining: Vec<String> = repo
            .list_by_owner("user_1")
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert!(remaining.contains(&active.id));
        assert!(remaining.contains(&recently_expired.id));
        assert!(!remaining.contains(&long_expired.id));
    }

    #[test]
    fn delete_all_for_owner_clears_index() {
        let (db, _dir) = temp_db();
        let repo = SessionRepository::new(&db);
        let now = Utc::now();
        repo.create(&session("user_1", now, 60)).unwrap();
        repo.create(&session("user_2", now, 60)).unwrap();

        assert_eq!(repo.delete_all_for_owner("user_1").unwrap(), 1);
        assert!(repo.list_by_owner("user_1").unwrap().is_empty());
        assert_eq!(repo.list_by_owner("user_2").unwrap().len(), 1);
    }

    #[test]
    fn debug_redacts_token() {
        let s = session("user_1", Utc::now(), 60);
        assert!(!format!("{s:?}").contains("opaque-token"));
    }
}
