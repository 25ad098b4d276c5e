//! Levy Ledger
//! Mission: Record field collections exactly once per trader per period
//!
//! # Invariants
//!
//! 1. **Idempotent replay**: resubmitting a known transaction reference
//!    returns the original row unchanged, never a second charge.
//! 2. **One Confirmed payment per (trader, period)**: a different reference
//!    for an already-settled period fails with `AlreadyPaidForPeriod`.
//! 3. **Atomicity**: the replay check, the period check, and the insert are
//!    one store transaction; concurrent scans of the same trader cannot both
//!    succeed, and the loser sees one of the two outcomes above.

use crate::config::LevyPolicy;
use crate::levy::period::{self, DueStatus};
use crate::models::{
    Amount, LevyPayment, PaymentMethod, PaymentStatus, Trader, TraderStatus,
};
use crate::qr::{QrCodec, QrDecodeError};
use crate::store::{LevyDb, PaymentInsert};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Business outcomes of levy operations. Store/protocol failures travel
/// separately as `Internal`.
#[derive(Debug)]
pub enum LevyError {
    TraderNotFound(String),
    TraderSuspended(String),
    AlreadyPaidForPeriod { period_key: String },
    InsufficientAmount { required: Amount, offered: Amount },
    MalformedQr,
    ExpiredQr,
    UnknownQr,
    Internal(anyhow::Error),
}

impl fmt::Display for LevyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevyError::TraderNotFound(id) => write!(f, "trader {} not found", id),
            LevyError::TraderSuspended(id) => write!(f, "trader {} is suspended", id),
            LevyError::AlreadyPaidForPeriod { period_key } => {
                write!(f, "levy already paid for period {}", period_key)
            }
            LevyError::InsufficientAmount { required, offered } => {
                write!(f, "amount {} below required {}", offered, required)
            }
            LevyError::MalformedQr => write!(f, "malformed QR token"),
            LevyError::ExpiredQr => write!(f, "expired QR token"),
            LevyError::UnknownQr => write!(f, "unknown QR token"),
            LevyError::Internal(err) => write!(f, "internal error: {}", err),
        }
    }
}

impl From<anyhow::Error> for LevyError {
    fn from(err: anyhow::Error) -> Self {
        LevyError::Internal(err)
    }
}

impl From<QrDecodeError> for LevyError {
    fn from(err: QrDecodeError) -> Self {
        match err {
            QrDecodeError::Malformed => LevyError::MalformedQr,
            QrDecodeError::Expired => LevyError::ExpiredQr,
        }
    }
}

/// Inputs for one collection event.
#[derive(Debug, Clone)]
pub struct RecordPaymentRequest {
    pub trader_id: String,
    pub collector_id: String,
    pub amount: Amount,
    pub payment_method: PaymentMethod,
    /// Caller-chosen idempotency reference; generated when absent.
    pub transaction_reference: Option<String>,
    /// Collection time; defaults to now. Drives the period key.
    pub as_of: Option<DateTime<Utc>>,
}

/// The levy ledger service. Owns levy payment rows; traders and fee rules
/// are read through the store but owned by the market CRUD layer.
pub struct LevyLedger {
    db: Arc<LevyDb>,
    codec: QrCodec,
    policy: LevyPolicy,
}

impl LevyLedger {
    pub fn new(db: Arc<LevyDb>, codec: QrCodec, policy: LevyPolicy) -> Self {
        Self { db, codec, policy }
    }

    /// Decode a scanned QR token, validate it against the stored trader
    /// record, and record the payment.
    ///
    /// A structurally valid token that no trader carries is `UnknownQr`:
    /// tokens are self-describing but never trusted without the lookup.
    pub async fn scan_and_record(
        &self,
        qr_token: &str,
        collector_id: &str,
        amount: Amount,
        payment_method: PaymentMethod,
        transaction_reference: Option<String>,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<LevyPayment, LevyError> {
        let now = as_of.unwrap_or_else(Utc::now);
        let identity = self.codec.decode(qr_token, now)?;

        let trader = self
            .db
            .trader_by_id(&identity.trader_id)
            .await?
            .ok_or(LevyError::UnknownQr)?;

        if trader.qr_code.as_deref() != Some(qr_token) {
            warn!(trader = %trader.id, "QR token decodes but is not the registered token");
            return Err(LevyError::UnknownQr);
        }

        self.record_payment(RecordPaymentRequest {
            trader_id: trader.id.clone(),
            collector_id: collector_id.to_string(),
            amount,
            payment_method,
            transaction_reference,
            as_of: Some(now),
        })
        .await
    }

    /// Record one levy collection.
    ///
    /// Steps: resolve trader -> replay check -> period check -> amount
    /// validation -> transactional insert -> incentive. Replay of a known
    /// reference short-circuits before validation so field-device retries
    /// always get the original result.
    pub async fn record_payment(
        &self,
        request: RecordPaymentRequest,
    ) -> Result<LevyPayment, LevyError> {
        let trader = self
            .db
            .trader_by_id(&request.trader_id)
            .await?
            .ok_or_else(|| LevyError::TraderNotFound(request.trader_id.clone()))?;

        if trader.status == TraderStatus::Suspended {
            return Err(LevyError::TraderSuspended(trader.id));
        }

        // Fast-path replay check; the guarded insert re-checks transactionally.
        if let Some(reference) = request.transaction_reference.as_deref() {
            if let Some(existing) = self.db.payment_by_reference(reference).await? {
                info!(reference = %reference, "idempotent levy replay");
                return Ok(existing);
            }
        }

        let as_of = request.as_of.unwrap_or_else(Utc::now);
        let due = self.due_status(&trader, as_of).await?;

        if !due.is_due {
            return Err(LevyError::AlreadyPaidForPeriod {
                period_key: due.period_key,
            });
        }

        if request.amount < due.amount_due && !self.partial_allowed(&trader).await? {
            return Err(LevyError::InsufficientAmount {
                required: due.amount_due,
                offered: request.amount,
            });
        }

        let reference = request
            .transaction_reference
            .clone()
            .unwrap_or_else(|| format!("LVY-{}", Uuid::new_v4().simple()));

        // Flat on-time bonus for the collector; informational only.
        let incentive = (self.policy.collector_incentive > 0)
            .then_some(self.policy.collector_incentive);

        let payment = LevyPayment {
            id: Uuid::new_v4().to_string(),
            trader_id: trader.id.clone(),
            collector_id: request.collector_id.clone(),
            amount: request.amount,
            period_key: due.period_key.clone(),
            payment_method: request.payment_method,
            status: PaymentStatus::Confirmed,
            transaction_reference: reference,
            collection_date: as_of,
            incentive_amount: incentive,
        };

        match self.db.record_payment_guarded(&payment).await? {
            PaymentInsert::Inserted => {
                info!(
                    trader = %payment.trader_id,
                    period = %payment.period_key,
                    amount = payment.amount,
                    "levy collected"
                );
                Ok(payment)
            }
            PaymentInsert::DuplicateReference(existing) => {
                info!(reference = %existing.transaction_reference, "idempotent levy replay");
                Ok(existing)
            }
            PaymentInsert::PeriodAlreadySettled => Err(LevyError::AlreadyPaidForPeriod {
                period_key: payment.period_key,
            }),
        }
    }

    /// Due status for a trader over its full confirmed history.
    pub async fn outstanding(
        &self,
        trader_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<DueStatus, LevyError> {
        let trader = self
            .db
            .trader_by_id(trader_id)
            .await?
            .ok_or_else(|| LevyError::TraderNotFound(trader_id.to_string()))?;
        self.due_status(&trader, as_of).await
    }

    async fn due_status(
        &self,
        trader: &Trader,
        as_of: DateTime<Utc>,
    ) -> Result<DueStatus, LevyError> {
        let history = self.db.confirmed_payments(&trader.id).await?;
        let rule = self
            .db
            .fee_rule(&trader.market_id, &trader.business_type)
            .await?;
        Ok(period::due_status(
            trader,
            &history,
            rule.as_ref(),
            as_of.date_naive(),
        ))
    }

    async fn partial_allowed(&self, trader: &Trader) -> Result<bool, LevyError> {
        let rule = self
            .db
            .fee_rule(&trader.market_id, &trader.business_type)
            .await?;
        Ok(rule
            .and_then(|r| r.allow_partial)
            .unwrap_or(self.policy.allow_partial_default))
    }
}
