// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state lives in a single redb file under `DATA_DIR`.
//!
//! ## Storage Layout
//!
//! ```text
//! $DATA_DIR/
//!   autotrader.redb
//!     schedules / schedule_names
//!     sessions / owner_sessions
//!     key_records
//!     audit_events
//! ```
//!
//! ## Important Notes
//!
//! - Only ciphertext is stored: exchange keys encrypted under the owner's
//!   password, persistent passwords encrypted under the server secret, and
//!   session tokens.
//! - All state transitions of a schedule happen inside one write transaction.

pub mod audit;
pub mod database;
pub mod ownership;
pub mod repository;

pub use audit::{AuditEvent, AuditEventType, AuditRepository};
pub use database::{run_blocking, CustodyDatabase, DbError, DbResult};
pub use ownership::{OwnedResource, OwnershipCheck};
pub use repository::{
    DueSchedule, ErrorRecord, KeyRecordSummary, KeyRepository, ScheduleClaim, ScheduleRepository,
    SessionRepository, SessionSummary, StoredKeyRecord, StoredSchedule, StoredSession,
};
