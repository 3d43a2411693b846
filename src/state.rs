// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state.

use std::sync::Arc;

use jsonwebtoken::DecodingKey;
use zeroize::Zeroizing;

use crate::config::AppConfig;
use crate::custody::SessionCustodian;
use crate::exchange::{ExchangeClient, ExchangeError};
use crate::scheduler::{
    AnalysisCycleExecutor, CycleError, CycleExecutor, ScheduleOrchestrator, SchedulerConfig,
};
use crate::storage::{CustodyDatabase, DbError};
use crate::trading::TradeService;

/// Authentication settings.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// HS256 key for owner bearer tokens. `None` rejects every owner request.
    pub owner_jwt_key: Option<DecodingKey>,
    /// Expected audience (optional)
    pub audience: Option<String>,
    /// Scheduler trigger secret. `None` rejects every trigger.
    pub scheduler_secret: Option<Arc<Zeroizing<String>>>,
}

impl AuthConfig {
    pub fn new(
        owner_jwt_secret: Option<&str>,
        audience: Option<String>,
        scheduler_secret: Option<String>,
    ) -> Self {
        Self {
            owner_jwt_key: owner_jwt_secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            audience,
            scheduler_secret: scheduler_secret.map(|s| Arc::new(Zeroizing::new(s))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("database: {0}")]
    Db(#[from] DbError),

    #[error("exchange client: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("analysis executor: {0}")]
    Executor(#[from] CycleError),
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<CustodyDatabase>,
    pub custodian: Arc<SessionCustodian>,
    pub trades: Arc<TradeService>,
    pub orchestrator: Arc<ScheduleOrchestrator>,
    pub auth_config: Arc<AuthConfig>,
}

impl AppState {
    /// Open the database and build every component from `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let db = Arc::new(CustodyDatabase::open(&config.database_path())?);
        let exchange = Arc::new(ExchangeClient::new(
            config.exchange_network,
            config.exchange_api_url.clone(),
            config.asset_cache_ttl,
        )?);
        let executor = Arc::new(AnalysisCycleExecutor::new(
            config.analysis_service_url.clone(),
            config.analysis_service_token.clone(),
        )?);
        let auth_config = AuthConfig::new(
            config.owner_jwt_secret.as_deref(),
            config.owner_jwt_audience.clone(),
            config.scheduler_secret.clone(),
        );
        let scheduler = SchedulerConfig {
            max_concurrency: config.scheduler_max_concurrency,
            run_timeout: config.scheduler_run_timeout,
        };

        Ok(Self::build(
            db,
            config.persistent_secret_key.clone(),
            exchange,
            executor,
            scheduler,
            auth_config,
        ))
    }

    pub fn build(
        db: Arc<CustodyDatabase>,
        persistent_secret: Option<String>,
        exchange: Arc<ExchangeClient>,
        executor: Arc<dyn CycleExecutor>,
        scheduler: SchedulerConfig,
        auth_config: AuthConfig,
    ) -> Self {
        let custodian = Arc::new(SessionCustodian::new(db.clone(), persistent_secret));
        let trades = Arc::new(TradeService::new(db.clone(), exchange));
        let orchestrator = Arc::new(ScheduleOrchestrator::new(
            db.clone(),
            custodian.clone(),
            trades.clone(),
            executor,
            scheduler,
        ));

        Self {
            db,
            custodian,
            trades,
            orchestrator,
            auth_config: Arc::new(auth_config),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::custody::custodian::tests::SERVER_SECRET;
    use crate::exchange::ExchangeNetwork;
    use crate::scheduler::{CycleReport, CycleRequest};
    use crate::storage::test_support::temp_db;

    pub(crate) const JWT_SECRET: &str = "owner-jwt-test-secret";
    pub(crate) const TRIGGER_SECRET: &str = "trigger-test-secret";

    /// Executor that succeeds without trading.
    pub(crate) struct NoopExecutor;

    #[async_trait]
    impl CycleExecutor for NoopExecutor {
        async fn execute(&self, request: CycleRequest<'_>) -> Result<CycleReport, CycleError> {
            Ok(CycleReport {
                decisions: request.coins.len(),
                ..CycleReport::default()
            })
        }
    }

    /// State with every tier and secret configured and an offline exchange.
    pub(crate) fn test_state() -> (AppState, TempDir) {
        let (db, dir) = temp_db();
        let exchange = ExchangeClient::new(
            ExchangeNetwork::Testnet,
            Some("http://127.0.0.1:9".into()),
            Duration::from_secs(60),
        )
        .unwrap();
        let state = AppState::build(
            db,
            Some(SERVER_SECRET.into()),
            Arc::new(exchange),
            Arc::new(NoopExecutor),
            SchedulerConfig::default(),
            AuthConfig::new(Some(JWT_SECRET), None, Some(TRIGGER_SECRET.into())),
        );
        (state, dir)
    }

    /// A valid owner token for `user_id`.
    pub(crate) fn owner_token(user_id: &str) -> String {
        let claims = crate::auth::OwnerClaims {
            sub: user_id.into(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
            sid: None,
            aud: None,
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .unwrap()
    }
}
