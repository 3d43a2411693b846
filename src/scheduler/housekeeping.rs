// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Housekeeping
//!
//! Background task that periodically deletes execution sessions which were
//! revoked, or expired more than the retention window ago. Resolution never
//! depends on this: expiry and revocation are checked on every lookup.
//!
//! ## Shutdown
//!
//! Stops when its `CancellationToken` is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::custody::SessionCustodian;

pub const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_SESSION_RETENTION: Duration = Duration::from_secs(24 * 3600);

pub struct SessionHousekeeper {
    custodian: Arc<SessionCustodian>,
    interval: Duration,
    retention: chrono::Duration,
}

impl SessionHousekeeper {
    pub fn new(custodian: Arc<SessionCustodian>, interval: Duration, retention: Duration) -> Self {
        Self {
            custodian,
            interval,
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::hours(24)),
        }
    }

    /// Run the cleanup loop until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(housekeeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_hours = self.retention.num_hours(),
            "Session housekeeping starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Session housekeeping shutting down");
                return;
            }

            self.sweep();

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Session housekeeping shutting down");
                    return;
                }
            }
        }
    }

    /// One cleanup pass. Returns the number of deleted sessions.
    pub fn sweep(&self) -> usize {
        match self.custodian.cleanup_sessions(self.retention) {
            Ok(0) => 0,
            Ok(deleted) => {
                info!(deleted, "Removed stale execution sessions");
                deleted
            }
            Err(e) => {
                warn!(error = %e, "Session cleanup failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::custodian::tests::{store_key, OWNER, PASSWORD};
    use crate::custody::ExecutionPassword;
    use crate::storage::test_support::temp_db;

    #[test]
    fn sweep_removes_revoked_sessions() {
        let (db, _dir) = temp_db();
        store_key(&db, OWNER);
        let custodian = Arc::new(SessionCustodian::new(db, None));
        let session = custodian
            .create_session(OWNER, &ExecutionPassword::new(PASSWORD), chrono::Duration::hours(1))
            .unwrap();
        let housekeeper = SessionHousekeeper::new(
            custodian.clone(),
            DEFAULT_HOUSEKEEPING_INTERVAL,
            DEFAULT_SESSION_RETENTION,
        );

        assert_eq!(housekeeper.sweep(), 0);
        custodian.revoke_session(&session.id).unwrap();
        assert_eq!(housekeeper.sweep(), 1);
        assert!(custodian.list_sessions(OWNER).unwrap().is_empty());
    }

    #[tokio::test]
    async fn stops_on_cancellation() {
        let (db, _dir) = temp_db();
        let custodian = Arc::new(SessionCustodian::new(db, None));
        let housekeeper =
            SessionHousekeeper::new(custodian, Duration::from_secs(3600), DEFAULT_SESSION_RETENTION);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(housekeeper.run(shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
