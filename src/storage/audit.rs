// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Key uploads, session lifecycle, schedule changes, autonomous runs and
//! order submissions are appended to the `audit_events` table. Details never
//! contain passwords, tokens or key material.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{decode, CustodyDatabase, DbResult, AUDIT_EVENTS};

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Key events
    KeyStored,
    KeyDeleted,
    PersistentEnabled,
    PersistentDisabled,

    // Session events
    SessionCreated,
    SessionRevoked,
    SessionsRevokedAll,

    // Schedule events
    ScheduleCreated,
    ScheduleUpdated,
    ScheduleDeleted,
    ScheduleEnabled,
    ScheduleDisabled,
    ScheduleAutoDisabled,
    ScheduleRunSucceeded,
    ScheduleRunFailed,

    // Trading events
    OrderSubmitted,
    OrderRejected,

    // Scheduler / auth events
    SchedulerTriggered,
    AuthFailure,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User who triggered the event (if known).
    pub user_id: Option<String>,
    /// Resource affected (schedule_id, session_id, etc.).
    pub resource_id: Option<String>,
    /// Resource type (schedule, session, etc.).
    pub resource_type: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    fn storage_key(&self) -> String {
        format!(
            "{}|{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.event_id
        )
    }
}

/// Repository for audit events.
pub struct AuditRepository<'a> {
    db: &'a CustodyDatabase,
}

impl<'a> AuditRepository<'a> {
    pub fn new(db: &'a CustodyDatabase) -> Self {
        Self { db }
    }

    pub fn log(&self, event: &AuditEvent) -> DbResult<()> {
        let json = serde_json::to_vec(event)?;
        let key = event.storage_key();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_EVENTS)?;
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Log an event, downgrading storage failures to a warning.
    ///
    /// Audit writes never fail the operation they describe.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event) {
            tracing::warn!(error = %e, event_type = ?event.event_type, "Failed to write audit event");
        }
    }

    /// Events for one UTC date, oldest first.
    pub fn read_events(&self, date: NaiveDate) -> DbResult<Vec<AuditEvent>> {
        let day = date.format("%Y-%m-%d").to_string();
        let start = format!("{day}T");
        let end = format!("{day}U");

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_EVENTS)?;
        let mut events = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            events.push(decode(value.value())?);
        }
        Ok(events)
    }

    pub fn search_by_user(&self, user_id: &str, date: NaiveDate) -> DbResult<Vec<AuditEvent>> {
        let events = self.read_events(date)?;
        Ok(events
            .into_iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .collect())
    }
}

/// Helper macro for logging audit events for an authenticated owner.
#[macro_export]
macro_rules! audit_log {
    ($db:expr, $event_type:expr, $user:expr) => {{
        let event = $crate::storage::AuditEvent::new($event_type).with_user(&$user.user_id);
        $crate::storage::AuditRepository::new($db).record(event);
    }};
    ($db:expr, $event_type:expr, $user:expr, $resource_type:expr, $resource_id:expr) => {{
        let event = $crate::storage::AuditEvent::new($event_type)
            .with_user(&$user.user_id)
            .with_resource($resource_type, $resource_id);
        $crate::storage::AuditRepository::new($db).record(event);
    }};
}
