// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the custody database.
//!
//! Each repository borrows the database and provides operations for one
//! entity type.

pub mod keys;
pub mod schedules;
pub mod sessions;

pub use keys::{KeyRecordSummary, KeyRepository, StoredKeyRecord};
pub use schedules::{DueSchedule, ErrorRecord, ScheduleClaim, ScheduleRepository, StoredSchedule};
pub use sessions::{SessionRepository, SessionSummary, StoredSession};
