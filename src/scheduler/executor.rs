// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cycle executors: the analysis step of a scheduled run, and the orders it
//! decides on.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;
use utoipa::ToSchema;

use crate::exchange::{OrderOutcome, TradeOptions};
use crate::trading::{TradeAuthority, TradeIntent};

const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(90);

/// Input to one cycle.
#[derive(Debug)]
pub struct CycleRequest<'a> {
    pub schedule_id: &'a str,
    pub owner: &'a str,
    pub coins: &'a [String],
    /// Present only when execution is authorised and a password resolved.
    /// Without it the cycle is analysis-only.
    pub authority: Option<TradeAuthority<'a>>,
}

/// Result for one coin's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CoinResult {
    pub coin: String,
    pub action: DecisionAction,
    pub executed: bool,
    pub order_id: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub decisions: usize,
    pub orders_attempted: usize,
    pub orders_succeeded: usize,
    pub results: Vec<CoinResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("analysis service not configured")]
    NotConfigured,

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("no credential: {0}")]
    NoCredential(String),

    #[error("all {attempted} orders failed: {last_error}")]
    AllOrdersFailed { attempted: usize, last_error: String },
}

/// Runs one analysis/execution cycle for a schedule.
#[async_trait]
pub trait CycleExecutor: Send + Sync {
    async fn execute(&self, request: CycleRequest<'_>) -> Result<CycleReport, CycleError>;
}

// =============================================================================
// Decisions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Buy,
    Sell,
    Hold,
}

/// One decision returned by the analysis service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeDecision {
    pub coin: String,
    pub action: DecisionAction,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub reduce_only: bool,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    decisions: Vec<TradeDecision>,
}

impl TradeDecision {
    fn to_intent(&self) -> Result<TradeIntent, String> {
        let is_buy = match self.action {
            DecisionAction::Buy => true,
            DecisionAction::Sell => false,
            DecisionAction::Hold => return Err("hold has no order".into()),
        };
        let (Some(size), Some(price)) = (self.size, self.price) else {
            return Err("decision is missing size or price".into());
        };
        Ok(TradeIntent {
            coin: self.coin.to_ascii_uppercase(),
            is_buy,
            size,
            price,
            options: TradeOptions {
                reduce_only: self.reduce_only,
                ..TradeOptions::default()
            },
        })
    }
}

/// Execute `decisions` under `authority`, one coin at a time. A failed coin
/// does not stop the rest. Coins outside the schedule are ignored.
pub async fn apply_decisions(
    decisions: &[TradeDecision],
    coins: &[String],
    authority: Option<&TradeAuthority<'_>>,
) -> Result<CycleReport, CycleError> {
    let allowed: HashSet<String> = coins.iter().map(|c| c.to_ascii_uppercase()).collect();
    let mut report = CycleReport {
        decisions: decisions.len(),
        ..CycleReport::default()
    };
    let mut last_error = None;

    for decision in decisions {
        let coin = decision.coin.to_ascii_uppercase();
        if !allowed.contains(&coin) {
            warn!(coin = %coin, "Ignoring decision for coin outside the schedule");
            continue;
        }

        let mut result = CoinResult {
            coin: coin.clone(),
            action: decision.action,
            executed: false,
            order_id: None,
            error: None,
        };

        match (decision.action, authority) {
            (DecisionAction::Hold, _) | (_, None) => {}
            (_, Some(authority)) => {
                report.orders_attempted += 1;
                let outcome = match decision.to_intent() {
                    Ok(intent) => authority
                        .place_order(&intent)
                        .await
                        .map_err(|e| e.to_string())
                        .and_then(|outcome| match outcome {
                            OrderOutcome::Rejected { message } => Err(message),
                            accepted => Ok(accepted.order_id().unwrap_or_default()),
                        }),
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(order_id) => {
                        report.orders_succeeded += 1;
                        result.executed = true;
                        result.order_id = Some(order_id);
                    }
                    Err(e) => {
                        warn!(coin = %coin, error = %e, "Cycle order failed");
                        result.error = Some(e.clone());
                        last_error = Some(e);
                    }
                }
            }
        }
        report.results.push(result);
    }

    if report.orders_attempted > 0 && report.orders_succeeded == 0 {
        return Err(CycleError::AllOrdersFailed {
            attempted: report.orders_attempted,
            last_error: last_error.unwrap_or_default(),
        });
    }
    Ok(report)
}

// =============================================================================
// HTTP analysis service
// =============================================================================

/// Executor backed by an external analysis service.
///
/// POSTs `{owner, scheduleId, coins, execute}` and expects
/// `{"decisions": [{coin, action, size, price, reduceOnly}]}`.
pub struct AnalysisCycleExecutor {
    url: Option<Url>,
    token: Option<String>,
    http: Client,
}

impl AnalysisCycleExecutor {
    pub fn new(url: Option<String>, token: Option<String>) -> Result<Self, CycleError> {
        let url = url
            .filter(|u| !u.is_empty())
            .map(|u| Url::parse(&u))
            .transpose()
            .map_err(|e| CycleError::Analysis(format!("invalid analysis service URL: {e}")))?;
        let http = Client::builder()
            .timeout(ANALYSIS_TIMEOUT)
            .build()
            .map_err(|e| CycleError::Analysis(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url,
            token: token.filter(|t| !t.is_empty()),
            http,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    async fn analyse(&self, request: &CycleRequest<'_>) -> Result<Vec<TradeDecision>, CycleError> {
        let Some(url) = &self.url else {
            return Err(CycleError::NotConfigured);
        };

        let mut call = self.http.post(url.clone()).json(&json!({
            "owner": request.owner,
            "scheduleId": request.schedule_id,
            "coins": request.coins,
            "execute": request.authority.is_some(),
        }));
        if let Some(token) = &self.token {
            call = call.bearer_auth(token);
        }

        let response = call
            .send()
            .await
            .map_err(|e| CycleError::Analysis(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CycleError::Analysis(format!("service returned {status}: {body}")));
        }

        let parsed: AnalysisResponse = response
            .json()
            .await
            .map_err(|e| CycleError::Analysis(format!("invalid response: {e}")))?;
        Ok(parsed.decisions)
    }
}

#[async_trait]
impl CycleExecutor for AnalysisCycleExecutor {
    async fn execute(&self, request: CycleRequest<'_>) -> Result<CycleReport, CycleError> {
        let decisions = self.analyse(&request).await?;
        debug!(
            schedule_id = %request.schedule_id,
            decisions = decisions.len(),
            "Analysis returned decisions"
        );

        let report = apply_decisions(&decisions, request.coins, request.authority.as_ref()).await?;
        info!(
            schedule_id = %request.schedule_id,
            attempted = report.orders_attempted,
            succeeded = report.orders_succeeded,
            "Cycle complete"
        );
        Ok(report)
    }
}
