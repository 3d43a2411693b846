// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Trade Execution
//!
//! Bridges a resolved execution password to a signed exchange order. The key
//! is decrypted on the blocking pool, returned as an owned [`SigningKey`]
//! and moved straight into [`ExchangeClient::execute_trade`], which drops it
//! once the order is signed. It is never stored or cloned.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use crate::custody::{
    CredentialVault, ExecutionPassword, KeyFormatError, NoCredentialReason, SigningKey, VaultError,
};
use crate::exchange::{ExchangeClient, ExchangeError, OrderOutcome, TradeOptions};
use crate::storage::{
    run_blocking, AuditEvent, AuditEventType, AuditRepository, CustodyDatabase, DbError,
    KeyRepository, StoredKeyRecord,
};

/// One order to place.
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub coin: String,
    pub is_buy: bool,
    pub size: Decimal,
    pub price: Decimal,
    pub options: TradeOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    #[error("no key record stored for this owner")]
    NoKeyRecord,

    #[error("no execution credential available: {0}")]
    NoCredential(NoCredentialReason),

    #[error("execution password does not unlock the stored key")]
    Decryption,

    #[error("stored key could not be read: {0}")]
    Vault(VaultError),

    #[error("stored key is not a valid signing key: {0}")]
    KeyFormat(#[from] KeyFormatError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<VaultError> for TradeError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Decryption => Self::Decryption,
            other => Self::Vault(other),
        }
    }
}

pub struct TradeService {
    db: Arc<CustodyDatabase>,
    vault: CredentialVault,
    exchange: Arc<ExchangeClient>,
}

impl TradeService {
    pub fn new(db: Arc<CustodyDatabase>, exchange: Arc<ExchangeClient>) -> Self {
        Self {
            db,
            vault: CredentialVault::new(),
            exchange,
        }
    }

    pub fn exchange(&self) -> &ExchangeClient {
        &self.exchange
    }

    /// Decrypt the stored key off the async runtime.
    async fn unlock(
        &self,
        record: StoredKeyRecord,
        password: &ExecutionPassword,
    ) -> Result<SigningKey, TradeError> {
        let vault = self.vault.clone();
        let password = password.clone();
        run_blocking(move || -> Result<SigningKey, TradeError> {
            let plaintext = vault.decrypt(&record.encrypted_key, password.expose())?;
            Ok(SigningKey::from_decrypted(&plaintext)?)
        })
        .await
    }

    /// Unlock the owner's key with `password` and place one order.
    ///
    /// An order refused by the exchange comes back as
    /// `Ok(OrderOutcome::Rejected)`; transport and API failures as `Err`.
    pub async fn execute_with_password(
        &self,
        owner: &str,
        password: &ExecutionPassword,
        intent: &TradeIntent,
    ) -> Result<OrderOutcome, TradeError> {
        let record = KeyRepository::new(&self.db)
            .get(owner)?
            .ok_or(TradeError::NoKeyRecord)?;
        let key = self.unlock(record, password).await?;

        let result = self
            .exchange
            .execute_trade(
                key,
                &intent.coin,
                intent.is_buy,
                intent.size,
                intent.price,
                intent.options.clone(),
            )
            .await;

        self.audit(owner, intent, &result);
        Ok(result?)
    }

    fn audit(&self, owner: &str, intent: &TradeIntent, result: &Result<OrderOutcome, ExchangeError>) {
        let details = json!({
            "coin": intent.coin,
            "is_buy": intent.is_buy,
            "size": intent.size.to_string(),
            "price": intent.price.to_string(),
            "network": self.exchange.network().to_string(),
        });

        let event = match result {
            Ok(outcome @ (OrderOutcome::Resting { .. } | OrderOutcome::Filled { .. })) => {
                let order_id = outcome.order_id().unwrap_or_default();
                info!(owner = %owner, coin = %intent.coin, order_id, "Order accepted");
                AuditEvent::new(AuditEventType::OrderSubmitted)
                    .with_resource("order", order_id.to_string())
            }
            Ok(OrderOutcome::Rejected { message }) => {
                warn!(owner = %owner, coin = %intent.coin, error = %message, "Order rejected by exchange");
                AuditEvent::new(AuditEventType::OrderRejected).failed(message.clone())
            }
            Err(e) => {
                warn!(owner = %owner, coin = %intent.coin, error = %e, "Order submission failed");
                AuditEvent::new(AuditEventType::OrderRejected).failed(e.to_string())
            }
        };
        AuditRepository::new(&self.db).record(event.with_user(owner).with_details(details));
    }
}

/// Permission to trade for one owner with an already-resolved password.
///
/// Cycle executors receive this instead of the password itself.
pub struct TradeAuthority<'a> {
    trades: &'a TradeService,
    owner: &'a str,
    password: &'a ExecutionPassword,
}

impl<'a> TradeAuthority<'a> {
    pub fn new(trades: &'a TradeService, owner: &'a str, password: &'a ExecutionPassword) -> Self {
        Self {
            trades,
            owner,
            password,
        }
    }

    pub fn owner(&self) -> &str {
        self.owner
    }

    pub async fn place_order(&self, intent: &TradeIntent) -> Result<OrderOutcome, TradeError> {
        self.trades
            .execute_with_password(self.owner, self.password, intent)
            .await
    }
}

impl std::fmt::Debug for TradeAuthority<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeAuthority")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::custody::custodian::tests::{store_key, OWNER, PASSWORD};
    use crate::exchange::ExchangeNetwork;
    use crate::storage::test_support::temp_db;
    use std::str::FromStr;
    use std::time::Duration;

    /// Trade service pointed at an unroutable exchange URL.
    pub(crate) fn offline_trades(db: Arc<CustodyDatabase>) -> Arc<TradeService> {
        let exchange = ExchangeClient::new(
            ExchangeNetwork::Testnet,
            Some("http://127.0.0.1:9".into()),
            Duration::from_secs(60),
        )
        .unwrap();
        Arc::new(TradeService::new(db, Arc::new(exchange)))
    }

    fn intent(coin: &str) -> TradeIntent {
        TradeIntent {
            coin: coin.into(),
            is_buy: true,
            size: Decimal::from_str("0.01").unwrap(),
            price: Decimal::from_str("60000").unwrap(),
            options: TradeOptions::default(),
        }
    }

    #[tokio::test]
    async fn missing_key_record() {
        let (db, _dir) = temp_db();
        let trades = offline_trades(db);
        let result = trades
            .execute_with_password(OWNER, &ExecutionPassword::new(PASSWORD), &intent("BTC"))
            .await;
        assert!(matches!(result, Err(TradeError::NoKeyRecord)));
    }

    #[tokio::test]
    async fn wrong_password_is_a_decryption_error() {
        let (db, _dir) = temp_db();
        store_key(&db, OWNER);
        let trades = offline_trades(db);
        let result = trades
            .execute_with_password(OWNER, &ExecutionPassword::new("wrong"), &intent("BTC"))
            .await;
        assert!(matches!(result, Err(TradeError::Decryption)));
    }

    #[tokio::test]
    async fn transport_failure_is_retryable_and_audited() {
        let (db, _dir) = temp_db();
        store_key(&db, OWNER);
        let trades = offline_trades(db.clone());
        let password = ExecutionPassword::new(PASSWORD);
        let authority = TradeAuthority::new(&trades, OWNER, &password);

        let err = authority.place_order(&intent("ETH")).await.unwrap_err();
        match err {
            TradeError::Exchange(e) => assert!(e.is_retryable()),
            other => panic!("expected exchange error, got {other:?}"),
        }

        let events = AuditRepository::new(&db)
            .search_by_user(OWNER, chrono::Utc::now().date_naive())
            .unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == AuditEventType::OrderRejected && !e.success));
    }

    #[test]
    fn authority_debug_hides_password() {
        let (db, _dir) = temp_db();
        let trades = offline_trades(db);
        let password = ExecutionPassword::new(PASSWORD);
        let authority = TradeAuthority::new(&trades, OWNER, &password);
        let debug = format!("{authority:?}");
        assert!(debug.contains(OWNER));
        assert!(!debug.contains(PASSWORD));
    }
}
