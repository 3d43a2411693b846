// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ownership enforcement for owner-scoped records.
//!
//! A record that belongs to someone else is reported as not found, so the
//! API never confirms that another owner's schedule or session exists.

use crate::auth::AuthenticatedUser;

use super::database::{DbError, DbResult};

/// Trait for resources that have an owner.
pub trait OwnedResource {
    fn owner_user_id(&self) -> &str;
}

/// Verify ownership of a looked-up resource.
pub trait OwnershipCheck<T> {
    /// Return the resource if `user` owns it, `DbError::NotFound` otherwise.
    fn verify_owner(self, user: &AuthenticatedUser) -> DbResult<T>;
}

impl<T: OwnedResource> OwnershipCheck<T> for DbResult<T> {
    fn verify_owner(self, user: &AuthenticatedUser) -> DbResult<T> {
        let resource = self?;
        if resource.owner_user_id() == user.user_id {
            Ok(resource)
        } else {
            Err(DbError::NotFound("resource".to_string()))
        }
    }
}
