// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::custody::CustodyError;
use crate::exchange::ExchangeError;
use crate::scheduler::SchedulerError;
use crate::storage::DbError;
use crate::trading::TradeError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PRECONDITION_FAILED, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    /// Log `detail` and return a generic 500. The detail never reaches the client.
    pub fn internal(detail: &dyn std::fmt::Display) -> Self {
        error!(error = %detail, "Internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

// =============================================================================
// Domain error conversions
// =============================================================================

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => Self::not_found(format!("{what} not found")),
            DbError::AlreadyExists(what) => Self::conflict(format!("{what} already exists")),
            DbError::Conflict(what) => Self::conflict(what),
            other => Self::internal(&other),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Db(e) => e.into(),
        }
    }
}

impl From<CustodyError> for ApiError {
    fn from(err: CustodyError) -> Self {
        match err {
            CustodyError::Db(e) => e.into(),
            CustodyError::NoKeyRecord => Self::not_found("No exchange key stored"),
            CustodyError::WrongPassword => Self::forbidden(err.to_string()),
            CustodyError::Vault(_) => Self::unprocessable(err.to_string()),
            CustodyError::InvalidTtl { .. } => Self::bad_request(err.to_string()),
            CustodyError::PersistentTierUnavailable => Self::service_unavailable(err.to_string()),
            CustodyError::SessionNotFound => Self::not_found("Session not found"),
            CustodyError::SessionRevoked => Self::conflict(err.to_string()),
            CustodyError::Token(e) => Self::internal(&e),
        }
    }
}

impl From<ExchangeError> for ApiError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::AssetNotFound(_) | ExchangeError::InvalidOrder(_) => {
                Self::bad_request(err.to_string())
            }
            ExchangeError::Signing(_) | ExchangeError::Encoding(_) => Self::internal(&err),
            ExchangeError::Http(_)
            | ExchangeError::Api { .. }
            | ExchangeError::InvalidResponse(_) => Self::bad_gateway(err.to_string()),
        }
    }
}

impl From<TradeError> for ApiError {
    fn from(err: TradeError) -> Self {
        match err {
            TradeError::NoKeyRecord => Self::not_found("No exchange key stored"),
            TradeError::NoCredential(_) => Self::precondition_failed(err.to_string()),
            TradeError::Decryption => Self::forbidden(err.to_string()),
            TradeError::Vault(_) | TradeError::KeyFormat(_) => Self::unprocessable(err.to_string()),
            TradeError::Exchange(e) => e.into(),
            TradeError::Db(e) => e.into(),
        }
    }
}
