// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Two independent credentials reach this server:
//!
//! 1. Owners send `Authorization: Bearer <JWT>` (HS256, `OWNER_JWT_SECRET`).
//!    `sub` becomes the canonical `user_id` every owner-scoped query filters on.
//! 2. The external timer calling `POST /v1/scheduler/run` sends the static
//!    `SCHEDULER_SECRET`. It identifies no owner and cannot be substituted
//!    by an owner token.
//!
//! ## Security
//!
//! - Both checks fail closed when their secret is not configured
//! - Clock skew tolerance is 60 seconds
//! - Trigger secrets are compared in constant time

pub mod claims;
pub mod error;
pub mod extractor;

pub use claims::{AuthenticatedUser, OwnerClaims};
pub use error::AuthError;
pub use extractor::{Auth, SchedulerTrigger};
