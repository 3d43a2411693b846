// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Autonomous trading schedule repository.
//!
//! Each schedule carries a monotonically increasing `version`. The scheduler
//! claims a due schedule with a compare-and-set on that version and stores a
//! [`ScheduleClaim`] whose expiry covers the whole run. A claimed schedule is
//! not due until the claim is released by the outcome write or expires, so
//! overlapping batches cannot run the same schedule twice. Outcome writes
//! made on behalf of a claim only land while that claim is still held.

use chrono::{DateTime, Duration, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{
    decode, owner_key, CustodyDatabase, DbError, DbResult, SCHEDULES, SCHEDULE_NAMES,
};
use crate::storage::OwnedResource;

/// Longest error message kept in `last_error`.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Stored schedule.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredSchedule {
    pub id: String,
    pub owner_user_id: String,
    pub name: String,
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Uppercase coin tickers analysed each cycle.
    pub coins: Vec<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    /// `None` means "due now" when enabled.
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub last_error: Option<String>,
    pub consecutive_errors: u32,
    pub max_consecutive_errors: u32,
    /// Present while a run is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<ScheduleClaim>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredSchedule {
    /// New schedules start disabled.
    pub fn new(
        owner_user_id: impl Into<String>,
        name: impl Into<String>,
        interval_seconds: u64,
        coins: Vec<String>,
        max_consecutive_errors: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_user_id: owner_user_id.into(),
            name: name.into(),
            enabled: false,
            interval_seconds,
            coins,
            last_run_at: None,
            next_run_at: None,
            run_count: 0,
            last_error: None,
            consecutive_errors: 0,
            max_consecutive_errors,
            claim: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Due iff enabled, under the error limit, `next_run_at` is unset or
    /// not in the future, and no unexpired claim is held.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.consecutive_errors < self.max_consecutive_errors
            && self.next_run_at.is_none_or(|next| next <= now)
            && self.claim.as_ref().is_none_or(|claim| claim.expires_at <= now)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

impl OwnedResource for StoredSchedule {
    fn owner_user_id(&self) -> &str {
        &self.owner_user_id
    }
}

/// An in-flight run's hold on a schedule.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleClaim {
    pub claim_id: String,
    pub expires_at: DateTime<Utc>,
}

/// One row of the due-schedule query.
#[derive(Debug, Clone, PartialEq)]
pub struct DueSchedule {
    pub schedule_id: String,
    pub owner_user_id: String,
    pub coins: Vec<String>,
    pub interval_seconds: u64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl From<&StoredSchedule> for DueSchedule {
    fn from(schedule: &StoredSchedule) -> Self {
        Self {
            schedule_id: schedule.id.clone(),
            owner_user_id: schedule.owner_user_id.clone(),
            coins: schedule.coins.clone(),
            interval_seconds: schedule.interval_seconds,
            next_run_at: schedule.next_run_at,
            version: schedule.version,
        }
    }
}

/// Result of recording a failed run.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub schedule: StoredSchedule,
    /// True when this error tripped the consecutive-error limit.
    pub auto_disabled: bool,
}

/// `now + seconds`, saturating at the maximum representable instant.
pub(crate) fn advance(now: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

/// Repository for schedule operations.
pub struct ScheduleRepository<'a> {
    db: &'a CustodyDatabase,
}

impl<'a> ScheduleRepository<'a> {
    pub fn new(db: &'a CustodyDatabase) -> Self {
        Self { db }
    }

    pub fn get(&self, schedule_id: &str) -> DbResult<StoredSchedule> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SCHEDULES)?;
        match table.get(schedule_id)? {
            Some(value) => decode(value.value()),
            None => Err(DbError::NotFound(format!("Schedule {schedule_id}"))),
        }
    }

    /// Create a schedule. Names are unique per owner.
    pub fn create(&self, schedule: &StoredSchedule) -> DbResult<()> {
        let json = serde_json::to_vec(schedule)?;
        let name_key = owner_key(&schedule.owner_user_id, &schedule.name);

        let write_txn = self.db.begin_write()?;
        {
            let mut schedules = write_txn.open_table(SCHEDULES)?;
            let mut names = write_txn.open_table(SCHEDULE_NAMES)?;
            if schedules.get(schedule.id.as_str())?.is_some() {
                return Err(DbError::AlreadyExists(format!("Schedule {}", schedule.id)));
            }
            if names.get(name_key.as_str())?.is_some() {
                return Err(DbError::AlreadyExists(format!(
                    "Schedule named '{}'",
                    schedule.name
                )));
            }
            schedules.insert(schedule.id.as_str(), json.as_slice())?;
            names.insert(name_key.as_str(), schedule.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Apply `mutate` to a schedule atomically, bumping its version.
    ///
    /// A rename is checked against the owner's other schedule names in the
    /// same transaction.
    pub fn update<F>(&self, schedule_id: &str, now: DateTime<Utc>, mutate: F) -> DbResult<StoredSchedule>
    where
        F: FnOnce(&mut StoredSchedule),
    {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut schedules = write_txn.open_table(SCHEDULES)?;
            let mut names = write_txn.open_table(SCHEDULE_NAMES)?;

            let current: StoredSchedule = match schedules.get(schedule_id)? {
                Some(value) => decode(value.value())?,
                None => return Err(DbError::NotFound(format!("Schedule {schedule_id}"))),
            };
            let mut updated = current.clone();
            mutate(&mut updated);
            // Identity fields are immutable
            updated.id = current.id.clone();
            updated.owner_user_id = current.owner_user_id.clone();
            updated.version = current.version;
            updated.touch(now);

            if updated.name != current.name {
                let new_key = owner_key(&updated.owner_user_id, &updated.name);
                if names.get(new_key.as_str())?.is_some() {
                    return Err(DbError::AlreadyExists(format!(
                        "Schedule named '{}'",
                        updated.name
                    )));
                }
                names.remove(owner_key(&current.owner_user_id, &current.name).as_str())?;
                names.insert(new_key.as_str(), updated.id.as_str())?;
            }

            let json = serde_json::to_vec(&updated)?;
            schedules.insert(schedule_id, json.as_slice())?;
            updated
        };
        write_txn.commit()?;
        Ok(updated)
    }

    pub fn delete(&self, schedule_id: &str) -> DbResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut schedules = write_txn.open_table(SCHEDULES)?;
            let mut names = write_txn.open_table(SCHEDULE_NAMES)?;
            let schedule: StoredSchedule = match schedules.remove(schedule_id)? {
                Some(value) => decode(value.value())?,
                None => return Err(DbError::NotFound(format!("Schedule {schedule_id}"))),
            };
            names.remove(owner_key(&schedule.owner_user_id, &schedule.name).as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn list_by_owner(&self, owner_user_id: &str) -> DbResult<Vec<StoredSchedule>> {
        let mut schedules: Vec<StoredSchedule> = self
            .list_all()?
            .into_iter()
            .filter(|s| s.owner_user_id == owner_user_id)
            .collect();
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(schedules)
    }

    pub fn list_all(&self) -> DbResult<Vec<StoredSchedule>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SCHEDULES)?;
        let mut schedules = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            schedules.push(decode(value.value())?);
        }
        Ok(schedules)
    }

    /// Every schedule due at `now`, read from one consistent snapshot.
    pub fn get_due_schedules(&self, now: DateTime<Utc>) -> DbResult<Vec<DueSchedule>> {
        let mut due: Vec<DueSchedule> = self
            .list_all()?
            .iter()
            .filter(|s| s.is_due_at(now))
            .map(DueSchedule::from)
            .collect();
        // Oldest-overdue first; never-run schedules lead.
        due.sort_by_key(|d| d.next_run_at);
        Ok(due)
    }

    /// Claim a due schedule for one run.
    ///
    /// Succeeds only if the stored version still equals `expected_version`
    /// and the schedule is still due. The claim holds for `lease`, which must
    /// cover the longest run. `next_run_at` also moves one interval forward
    /// so an abandoned claim does not make the schedule due at once.
    pub fn claim(
        &self,
        schedule_id: &str,
        expected_version: u64,
        lease: std::time::Duration,
        now: DateTime<Utc>,
    ) -> DbResult<Option<StoredSchedule>> {
        let write_txn = self.db.begin_write()?;
        let claimed = {
            let mut table = write_txn.open_table(SCHEDULES)?;
            let current: Option<StoredSchedule> = match table.get(schedule_id)? {
                Some(value) => Some(decode(value.value())?),
                None => None,
            };
            match current {
                Some(mut schedule)
                    if schedule.version == expected_version && schedule.is_due_at(now) =>
                {
                    schedule.next_run_at = Some(advance(now, schedule.interval_seconds));
                    schedule.claim = Some(ScheduleClaim {
                        claim_id: uuid::Uuid::new_v4().to_string(),
                        expires_at: advance(now, lease.as_secs().saturating_add(1)),
                    });
                    schedule.touch(now);
                    let json = serde_json::to_vec(&schedule)?;
                    table.insert(schedule_id, json.as_slice())?;
                    Some(schedule)
                }
                _ => None,
            }
        };
        write_txn.commit()?;
        Ok(claimed)
    }

    /// Apply an outcome write, releasing the claim.
    ///
    /// With `held_claim`, the write only lands if that claim is still the one
    /// stored; otherwise it fails with [`DbError::Conflict`] and nothing
    /// changes.
    fn record_outcome<F>(
        &self,
        schedule_id: &str,
        held_claim: Option<&str>,
        now: DateTime<Utc>,
        mutate: F,
    ) -> DbResult<StoredSchedule>
    where
        F: FnOnce(&mut StoredSchedule),
    {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(SCHEDULES)?;
            let mut schedule: StoredSchedule = match table.get(schedule_id)? {
                Some(value) => decode(value.value())?,
                None => return Err(DbError::NotFound(format!("Schedule {schedule_id}"))),
            };
            if let Some(held) = held_claim {
                let current = schedule.claim.as_ref().map(|c| c.claim_id.as_str());
                if current != Some(held) {
                    return Err(DbError::Conflict(format!(
                        "Schedule {schedule_id} claim no longer held"
                    )));
                }
            }
            mutate(&mut schedule);
            schedule.claim = None;
            schedule.touch(now);
            let json = serde_json::to_vec(&schedule)?;
            table.insert(schedule_id, json.as_slice())?;
            schedule
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Record a successful run: reset the error streak and schedule the next run.
    pub fn record_success(
        &self,
        schedule_id: &str,
        held_claim: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<StoredSchedule> {
        self.record_outcome(schedule_id, held_claim, now, |s| {
            s.last_run_at = Some(now);
            s.next_run_at = Some(advance(now, s.interval_seconds));
            s.run_count += 1;
            s.last_error = None;
            s.consecutive_errors = 0;
        })
    }

    /// Record a failed run, disabling the schedule once the consecutive error
    /// count reaches its limit. Run count and last run time are untouched.
    pub fn record_error(
        &self,
        schedule_id: &str,
        held_claim: Option<&str>,
        message: &str,
        now: DateTime<Utc>,
    ) -> DbResult<ErrorRecord> {
        let message = truncate_message(message);
        let mut auto_disabled = false;
        let schedule = self.record_outcome(schedule_id, held_claim, now, |s| {
            s.next_run_at = Some(advance(now, s.interval_seconds));
            s.last_error = Some(message);
            s.consecutive_errors = s.consecutive_errors.saturating_add(1);
            if s.enabled && s.consecutive_errors >= s.max_consecutive_errors {
                s.enabled = false;
                auto_disabled = true;
            }
        })?;
        Ok(ErrorRecord {
            schedule,
            auto_disabled,
        })
    }

    /// Enable a schedule: clear the error streak and make it due immediately.
    pub fn enable(&self, schedule_id: &str, now: DateTime<Utc>) -> DbResult<StoredSchedule> {
        self.update(schedule_id, now, |s| {
            s.enabled = true;
            s.consecutive_errors = 0;
            s.last_error = None;
            s.next_run_at = None;
        })
    }

    pub fn disable(&self, schedule_id: &str, now: DateTime<Utc>) -> DbResult<StoredSchedule> {
        self.update(schedule_id, now, |s| s.enabled = false)
    }
}
