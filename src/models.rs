//! Domain Models
//! Mission: Canonical shapes for traders, levy payments, and gateway transactions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// FIXED-POINT AMOUNT
// =============================================================================

/// Fixed-point amount in minor currency units (kobo-style).
/// This avoids floating point errors in accounting.
pub type Amount = i64;

/// Conversion factor: 1 major unit = 100 minor units
pub const AMOUNT_SCALE: i64 = 100;

/// Convert f64 major units to fixed-point Amount.
#[inline]
pub fn to_amount(value: f64) -> Amount {
    (value * AMOUNT_SCALE as f64).round() as Amount
}

/// Convert fixed-point Amount to f64 major units.
#[inline]
pub fn from_amount(amount: Amount) -> f64 {
    amount as f64 / AMOUNT_SCALE as f64
}

// =============================================================================
// TRADER
// =============================================================================

/// How often a trader owes the levy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentFrequency {
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
}

impl PaymentFrequency {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentFrequency::Daily => "daily",
            PaymentFrequency::Weekly => "weekly",
            PaymentFrequency::Monthly => "monthly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Some(PaymentFrequency::Daily),
            "weekly" => Some(PaymentFrequency::Weekly),
            "monthly" => Some(PaymentFrequency::Monthly),
            _ => None,
        }
    }
}

/// Trader account standing. Suspended traders cannot have payments
/// recorded against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraderStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "inactive")]
    Inactive,
    #[serde(rename = "suspended")]
    Suspended,
}

impl TraderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TraderStatus::Active => "active",
            TraderStatus::Inactive => "inactive",
            TraderStatus::Suspended => "suspended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(TraderStatus::Active),
            "inactive" => Some(TraderStatus::Inactive),
            "suspended" => Some(TraderStatus::Suspended),
            _ => None,
        }
    }
}

/// A registered market trader.
///
/// Owned by the market/trader CRUD layer; the levy core looks traders up by
/// id and never constructs or mutates them. The `qr_code` token, once
/// assigned, is immutable and unique across all traders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trader {
    pub id: String,
    pub market_id: String,
    pub collector_id: String,
    pub business_type: String,
    pub payment_frequency: PaymentFrequency,
    pub payment_amount: Amount,
    pub status: TraderStatus,
    pub qr_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// LEVY PAYMENT
// =============================================================================

/// How the levy was tendered in the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "cash")]
    Cash,
    #[serde(rename = "pos")]
    Pos,
    #[serde(rename = "transfer")]
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Pos => "pos",
            PaymentMethod::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "pos" => Some(PaymentMethod::Pos),
            "transfer" => Some(PaymentMethod::Transfer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "confirmed")]
    Confirmed,
    #[serde(rename = "failed")]
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "confirmed" => Some(PaymentStatus::Confirmed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// One levy collection event.
///
/// Invariants (enforced by the store's indexes):
/// 1. `transaction_reference` is globally unique; resubmission with a known
///    reference is an idempotent retry, never a second charge.
/// 2. At most one Confirmed payment exists per (trader_id, period_key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevyPayment {
    pub id: String,
    pub trader_id: String,
    pub collector_id: String,
    pub amount: Amount,
    /// Canonical billing period the payment is attributed to, e.g. "2024-W15".
    pub period_key: String,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_reference: String,
    pub collection_date: DateTime<Utc>,
    /// Collector bonus for an on-time collection. Informational only.
    pub incentive_amount: Option<Amount>,
}

// =============================================================================
// GATEWAY TRANSACTION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "confirmed")]
    Confirmed,
    #[serde(rename = "failed")]
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "confirmed" => Some(TransactionStatus::Confirmed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransactionStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "subscription")]
    Subscription,
    #[serde(rename = "other")]
    Other,
}

impl TransactionType {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionType::Subscription => "subscription",
            TransactionType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "subscription" => Some(TransactionType::Subscription),
            "other" => Some(TransactionType::Other),
            _ => None,
        }
    }
}

/// A gateway-backed (non-levy) payment.
///
/// Lifecycle: created Pending at initialization, transitions to Confirmed or
/// Failed exactly once upon verification, never backward. The transition is
/// an atomic conditional update in the store so concurrent duplicate verify
/// calls cannot both apply the confirmation side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayTransaction {
    pub id: String,
    pub sender_id: String,
    pub amount: Amount,
    /// Gateway-issued reference, globally unique.
    pub reference: String,
    pub status: TransactionStatus,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// FEE CONFIGURATION
// =============================================================================

/// A market/business-type levy override resolved from configuration.
///
/// Resolution order at lookup time: business-type override, then market-wide
/// default, then the trader's own configured `payment_amount`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeRule {
    pub amount: Amount,
    /// Whether amounts below the due amount are accepted. `None` falls back
    /// to the service-wide default.
    pub allow_partial: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_round_trip() {
        assert_eq!(to_amount(500.0), 50_000);
        assert_eq!(from_amount(50_000), 500.0);
        assert_eq!(to_amount(0.01), 1);
    }

    #[test]
    fn test_enum_str_round_trip() {
        for f in [
            PaymentFrequency::Daily,
            PaymentFrequency::Weekly,
            PaymentFrequency::Monthly,
        ] {
            assert_eq!(PaymentFrequency::from_str(f.as_str()), Some(f));
        }
        assert_eq!(PaymentFrequency::from_str("fortnightly"), None);
        assert_eq!(
            TraderStatus::from_str("SUSPENDED"),
            Some(TraderStatus::Suspended)
        );
        assert_eq!(
            TransactionStatus::from_str("confirmed"),
            Some(TransactionStatus::Confirmed)
        );
    }

    #[test]
    fn test_transaction_status_flags() {
        assert!(TransactionStatus::Confirmed.is_confirmed());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
    }
}
