// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Owner token claims and the authenticated owner representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Claims carried by an owner bearer token (HS256).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerClaims {
    /// Subject: the owner's user id
    pub sub: String,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    #[serde(default)]
    pub iat: i64,
    /// Session ID issued by the identity provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Audience, a string or an array (validated by jsonwebtoken when configured)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
}

/// The owner making a request.
///
/// Every owner-scoped handler receives one of these from the [`Auth`]
/// extractor and filters data by `user_id`.
///
/// [`Auth`]: super::Auth
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Canonical owner ID (`sub` claim)
    pub user_id: String,

    /// Identity-provider session ID (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Token expiration (Unix timestamp, not serialized)
    #[serde(skip)]
    pub expires_at: i64,
}

impl From<OwnerClaims> for AuthenticatedUser {
    fn from(claims: OwnerClaims) -> Self {
        Self {
            user_id: claims.sub,
            session_id: claims.sid,
            expires_at: claims.exp,
        }
    }
}
