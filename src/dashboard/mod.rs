//! Compliance Dashboard Aggregator
//! Mission: Read-only levy statistics per market or collector
//!
//! Composes the store's confirmed-payment totals with the period
//! calculator's due status. Never writes; safe to call concurrently with
//! ledger writes and reflects whatever snapshot the store serves
//! (read-committed is enough).

use crate::levy::period;
use crate::models::{Amount, TraderStatus};
use crate::store::LevyDb;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Aggregation scope: one market, or one collector's beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Market(String),
    Collector(String),
}

/// A trader that still owes for the current period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutstandingTrader {
    pub trader_id: String,
    pub business_type: String,
    pub period_key: String,
    pub amount_due: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSummary {
    /// Sum of Confirmed levy amounts in [from, to].
    pub total_collected: Amount,
    /// Percentage of active traders with nothing outstanding; 0 when the
    /// scope has no active traders (never NaN).
    pub compliance_rate: f64,
    pub outstanding_traders: Vec<OutstandingTrader>,
}

pub struct DashboardAggregator {
    db: Arc<LevyDb>,
}

impl DashboardAggregator {
    pub fn new(db: Arc<LevyDb>) -> Self {
        Self { db }
    }

    pub async fn summary(
        &self,
        scope: &Scope,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Result<ComplianceSummary> {
        let (total_collected, traders) = match scope {
            Scope::Market(market_id) => (
                self.db.total_collected_market(market_id, from, to).await?,
                self.db.traders_in_market(market_id).await?,
            ),
            Scope::Collector(collector_id) => (
                self.db
                    .total_collected_collector(collector_id, from, to)
                    .await?,
                self.db.traders_for_collector(collector_id).await?,
            ),
        };

        let active: Vec<_> = traders
            .into_iter()
            .filter(|t| t.status == TraderStatus::Active)
            .collect();

        let mut outstanding_traders = Vec::new();
        let mut compliant = 0usize;
        for trader in &active {
            let history = self.db.confirmed_payments(&trader.id).await?;
            let rule = self
                .db
                .fee_rule(&trader.market_id, &trader.business_type)
                .await?;
            let due =
                period::due_status(trader, &history, rule.as_ref(), as_of.date_naive());
            if due.is_due {
                outstanding_traders.push(OutstandingTrader {
                    trader_id: trader.id.clone(),
                    business_type: trader.business_type.clone(),
                    period_key: due.period_key,
                    amount_due: due.amount_due,
                });
            } else {
                compliant += 1;
            }
        }

        let compliance_rate = if active.is_empty() {
            0.0
        } else {
            compliant as f64 / active.len() as f64 * 100.0
        };

        Ok(ComplianceSummary {
            total_collected,
            compliance_rate,
            outstanding_traders,
        })
    }
}
