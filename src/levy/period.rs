//! Billing Period Calculator
//! Mission: Pure mapping from payment frequency + history to due status
//!
//! Period keys are stable and comparable: every date inside the same
//! physical period derives the same key, so "paid for this period" is a
//! plain string equality check. No I/O happens here; the dashboard relies
//! on identical inputs producing identical output.

use crate::models::{Amount, FeeRule, LevyPayment, PaymentFrequency, PaymentStatus, Trader};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Whether a trader currently owes the levy, and for which period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueStatus {
    pub is_due: bool,
    pub period_key: String,
    pub amount_due: Amount,
}

/// Derive the canonical period key for a date under a frequency.
///
/// Daily -> "2024-04-10", Weekly -> ISO "2024-W15", Monthly -> "2024-04".
pub fn period_key(frequency: PaymentFrequency, date: NaiveDate) -> String {
    match frequency {
        PaymentFrequency::Daily => date.format("%Y-%m-%d").to_string(),
        PaymentFrequency::Weekly => {
            let week = date.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        PaymentFrequency::Monthly => date.format("%Y-%m").to_string(),
    }
}

/// Evaluate whether `trader` owes the levy as of `as_of`.
///
/// `confirmed_history` is the trader's payment history; only rows with
/// Confirmed status count toward settling a period. `fee_rule` is the
/// already-resolved market/business-type override, if any; without one the
/// trader's configured rate is due.
pub fn due_status(
    trader: &Trader,
    confirmed_history: &[LevyPayment],
    fee_rule: Option<&FeeRule>,
    as_of: NaiveDate,
) -> DueStatus {
    let key = period_key(trader.payment_frequency, as_of);

    let paid = confirmed_history
        .iter()
        .any(|p| p.status == PaymentStatus::Confirmed && p.period_key == key);

    let amount_due = fee_rule.map(|r| r.amount).unwrap_or(trader.payment_amount);

    DueStatus {
        is_due: !paid,
        period_key: key,
        amount_due,
    }
}
