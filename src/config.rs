// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup into an
//! [`AppConfig`] and handed to each component's constructor. Nothing else in
//! the crate reads the environment.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the database file | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `SCHEDULER_SECRET` | Shared secret for the scheduler trigger | unset: trigger rejected |
//! | `PERSISTENT_SECRET_KEY` | Server-held secret for the persistent tier | unset: tier disabled |
//! | `OWNER_JWT_SECRET` | HS256 secret for owner bearer tokens | unset: owner endpoints rejected |
//! | `OWNER_JWT_AUDIENCE` | Expected `aud` claim | not checked |
//! | `EXCHANGE_NETWORK` | `mainnet` or `testnet` | `testnet` |
//! | `EXCHANGE_API_URL` | Override of the network's API base URL | network default |
//! | `ANALYSIS_SERVICE_URL` | Analysis endpoint called each cycle | unset: runs fail |
//! | `ANALYSIS_SERVICE_TOKEN` | Bearer token for the analysis service | none |
//! | `SCHEDULER_MAX_CONCURRENCY` | Concurrent runs per batch | `4` |
//! | `SCHEDULER_RUN_TIMEOUT_SECS` | Per-run timeout | `120` |
//! | `SESSION_RETENTION_HOURS` | Retention of expired sessions before cleanup | `24` |
//! | `HOUSEKEEPING_INTERVAL_SECS` | Session cleanup period | `3600` |
//! | `ASSET_CACHE_TTL_SECS` | Asset metadata cache TTL | `3600` |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::exchange::ExchangeNetwork;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const SCHEDULER_SECRET_ENV: &str = "SCHEDULER_SECRET";
pub const PERSISTENT_SECRET_KEY_ENV: &str = "PERSISTENT_SECRET_KEY";
pub const OWNER_JWT_SECRET_ENV: &str = "OWNER_JWT_SECRET";
pub const OWNER_JWT_AUDIENCE_ENV: &str = "OWNER_JWT_AUDIENCE";
pub const EXCHANGE_NETWORK_ENV: &str = "EXCHANGE_NETWORK";
pub const EXCHANGE_API_URL_ENV: &str = "EXCHANGE_API_URL";
pub const ANALYSIS_SERVICE_URL_ENV: &str = "ANALYSIS_SERVICE_URL";
pub const ANALYSIS_SERVICE_TOKEN_ENV: &str = "ANALYSIS_SERVICE_TOKEN";
pub const SCHEDULER_MAX_CONCURRENCY_ENV: &str = "SCHEDULER_MAX_CONCURRENCY";
pub const SCHEDULER_RUN_TIMEOUT_SECS_ENV: &str = "SCHEDULER_RUN_TIMEOUT_SECS";
pub const SESSION_RETENTION_HOURS_ENV: &str = "SESSION_RETENTION_HOURS";
pub const HOUSEKEEPING_INTERVAL_SECS_ENV: &str = "HOUSEKEEPING_INTERVAL_SECS";
pub const ASSET_CACHE_TTL_SECS_ENV: &str = "ASSET_CACHE_TTL_SECS";

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Database file name inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "autotrader.redb";

const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SESSION_RETENTION_HOURS: u64 = 24;
const DEFAULT_HOUSEKEEPING_INTERVAL_SECS: u64 = 3600;
const DEFAULT_ASSET_CACHE_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    /// `None` for unrecognised values. Unset means pretty.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim).filter(|v| !v.is_empty()) {
            Some("json") => Some(Self::Json),
            Some("pretty") | None => Some(Self::Pretty),
            Some(_) => None,
        }
    }

    /// Read `LOG_FORMAT` alone, so the subscriber can be installed before
    /// [`AppConfig::from_env`] logs its own warnings.
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref()).unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub scheduler_secret: Option<String>,
    pub persistent_secret_key: Option<String>,
    pub owner_jwt_secret: Option<String>,
    pub owner_jwt_audience: Option<String>,
    pub exchange_network: ExchangeNetwork,
    pub exchange_api_url: Option<String>,
    pub analysis_service_url: Option<String>,
    pub analysis_service_token: Option<String>,
    pub scheduler_max_concurrency: usize,
    pub scheduler_run_timeout: Duration,
    pub session_retention: Duration,
    pub housekeeping_interval: Duration,
    pub asset_cache_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let raw_format = get(LOG_FORMAT_ENV);
        let log_format = LogFormat::parse(raw_format.as_deref()).unwrap_or_else(|| {
            warn!(value = ?raw_format, "Unknown LOG_FORMAT, using pretty");
            LogFormat::Pretty
        });

        let exchange_network = match get(EXCHANGE_NETWORK_ENV) {
            None => ExchangeNetwork::Testnet,
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!(error = %e, "Invalid EXCHANGE_NETWORK, using testnet");
                ExchangeNetwork::Testnet
            }),
        };

        let secs = |name: &str, default: u64| Duration::from_secs(positive(get(name), name, default));

        Self {
            data_dir: PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.into())),
            host: get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.into()),
            port: positive(get(PORT_ENV), PORT_ENV, DEFAULT_PORT),
            log_format,
            scheduler_secret: get(SCHEDULER_SECRET_ENV),
            persistent_secret_key: get(PERSISTENT_SECRET_KEY_ENV),
            owner_jwt_secret: get(OWNER_JWT_SECRET_ENV),
            owner_jwt_audience: get(OWNER_JWT_AUDIENCE_ENV),
            exchange_network,
            exchange_api_url: get(EXCHANGE_API_URL_ENV),
            analysis_service_url: get(ANALYSIS_SERVICE_URL_ENV),
            analysis_service_token: get(ANALYSIS_SERVICE_TOKEN_ENV),
            scheduler_max_concurrency: positive(
                get(SCHEDULER_MAX_CONCURRENCY_ENV),
                SCHEDULER_MAX_CONCURRENCY_ENV,
                DEFAULT_MAX_CONCURRENCY,
            ),
            scheduler_run_timeout: secs(SCHEDULER_RUN_TIMEOUT_SECS_ENV, DEFAULT_RUN_TIMEOUT_SECS),
            session_retention: Duration::from_secs(
                positive(
                    get(SESSION_RETENTION_HOURS_ENV),
                    SESSION_RETENTION_HOURS_ENV,
                    DEFAULT_SESSION_RETENTION_HOURS,
                ) * 3600,
            ),
            housekeeping_interval: secs(HOUSEKEEPING_INTERVAL_SECS_ENV, DEFAULT_HOUSEKEEPING_INTERVAL_SECS),
            asset_cache_ttl: secs(ASSET_CACHE_TTL_SECS_ENV, DEFAULT_ASSET_CACHE_TTL_SECS),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse a positive number, falling back to `default` with a warning.
fn positive<T>(raw: Option<String>, name: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            warn!(variable = %name, value = %raw, "Invalid numeric setting, using default");
            default
        }
    }
}

fn redact(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "<set>"
    } else {
        "<unset>"
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("data_dir", &self.data_dir)
            .field("bind", &self.bind_address())
            .field("log_format", &self.log_format)
            .field("scheduler_secret", &redact(&self.scheduler_secret))
            .field("persistent_secret_key", &redact(&self.persistent_secret_key))
            .field("owner_jwt_secret", &redact(&self.owner_jwt_secret))
            .field("owner_jwt_audience", &self.owner_jwt_audience)
            .field("exchange_network", &self.exchange_network)
            .field("exchange_api_url", &self.exchange_api_url)
            .field("analysis_service_url", &self.analysis_service_url)
            .field("analysis_service_token", &redact(&self.analysis_service_token))
            .field("scheduler_max_concurrency", &self.scheduler_max_concurrency)
            .field("scheduler_run_timeout", &self.scheduler_run_timeout)
            .field("session_retention", &self.session_retention)
            .field("housekeeping_interval", &self.housekeeping_interval)
            .field("asset_cache_ttl", &self.asset_cache_ttl)
            .finish()
    }
}
