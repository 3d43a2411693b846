// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Autonomous Scheduling
//!
//! Batches are started from outside (the trigger endpoint); there is no
//! in-process scheduling loop. The only background task here is session
//! housekeeping.

pub mod executor;
pub mod housekeeping;
pub mod orchestrator;

pub use executor::{AnalysisCycleExecutor, CycleError, CycleExecutor, CycleReport, CycleRequest};
pub use housekeeping::SessionHousekeeper;
pub use orchestrator::{
    BatchReport, RunSummary, ScheduleOrchestrator, ScheduleOutcome, SchedulerConfig,
    SchedulerError,
};
