//! Payment Gateway Reconciler
//! Mission: Drive Pending transactions to exactly one terminal state
//!
//! Two-phase flow: `initialize` performs the gateway round-trip first and
//! persists the Pending row only on success, so a timed-out or failed
//! initialization leaves no orphan rows. `verify` is idempotent: the
//! Pending -> Confirmed transition is a conditional update in the store and
//! the confirmation side effect fires only on the call that wins it.
//!
//! There is no expiry for transactions stuck in Pending; verify remains
//! safe to re-invoke indefinitely.

use crate::gateway::client::{GatewayError, GatewayInit, GatewayVerdict, PaymentGateway};
use crate::models::{Amount, GatewayTransaction, TransactionStatus, TransactionType};
use crate::store::LevyDb;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Failures surfaced by reconciler operations.
#[derive(Debug)]
pub enum ReconcileError {
    /// Reference was never initialized here. A client error, not transient.
    NotFound(String),
    Gateway(GatewayError),
    Internal(anyhow::Error),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::NotFound(reference) => {
                write!(f, "transaction {} not found", reference)
            }
            ReconcileError::Gateway(err) => write!(f, "{}", err),
            ReconcileError::Internal(err) => write!(f, "internal error: {}", err),
        }
    }
}

impl From<anyhow::Error> for ReconcileError {
    fn from(err: anyhow::Error) -> Self {
        ReconcileError::Internal(err)
    }
}

impl From<GatewayError> for ReconcileError {
    fn from(err: GatewayError) -> Self {
        ReconcileError::Gateway(err)
    }
}

/// Verification result as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Confirmed,
    Failed,
    Pending,
}

impl VerifyOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            VerifyOutcome::Confirmed => "confirmed",
            VerifyOutcome::Failed => "failed",
            VerifyOutcome::Pending => "pending",
        }
    }
}

type ConfirmationHook = Box<dyn Fn(&GatewayTransaction) + Send + Sync>;

/// Reconciles the local transaction ledger against the external gateway.
pub struct GatewayReconciler {
    db: Arc<LevyDb>,
    gateway: Arc<dyn PaymentGateway>,
    /// Fires exactly once per transaction, on the Pending -> Confirmed
    /// transition (e.g. subscription activation).
    on_confirmed: Option<ConfirmationHook>,
}

impl GatewayReconciler {
    pub fn new(db: Arc<LevyDb>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            db,
            gateway,
            on_confirmed: None,
        }
    }

    pub fn with_confirmation_hook(
        mut self,
        hook: impl Fn(&GatewayTransaction) + Send + Sync + 'static,
    ) -> Self {
        self.on_confirmed = Some(Box::new(hook));
        self
    }

    /// Initialize a gateway payment and persist it as Pending.
    ///
    /// The gateway call happens first; nothing is persisted when it fails,
    /// so there are no orphan Pending rows to clean up.
    pub async fn initialize(
        &self,
        payer_id: &str,
        amount: Amount,
        description: &str,
        callback_url: &str,
    ) -> Result<GatewayInit, ReconcileError> {
        let reference = format!("TXN-{}", Uuid::new_v4().simple());

        let init = self
            .gateway
            .initialize(amount, payer_id, callback_url, &reference)
            .await?;

        let transaction = GatewayTransaction {
            id: Uuid::new_v4().to_string(),
            sender_id: payer_id.to_string(),
            amount,
            // The gateway's reference is authoritative from here on
            reference: init.reference.clone(),
            status: TransactionStatus::Pending,
            transaction_type: TransactionType::Subscription,
            description: Some(description.to_string()),
            created_at: Utc::now(),
            confirmed_at: None,
        };
        self.db.insert_transaction(&transaction).await?;

        info!(
            reference = %transaction.reference,
            payer = %payer_id,
            amount,
            "gateway transaction initialized"
        );

        Ok(init)
    }

    /// Verify a transaction by reference.
    ///
    /// Already-terminal rows return their cached verdict without a gateway
    /// round-trip. For Pending rows, one gateway call decides; a transport
    /// failure leaves the row Pending and the call safe to retry.
    pub async fn verify(&self, reference: &str) -> Result<VerifyOutcome, ReconcileError> {
        let transaction = self
            .db
            .transaction_by_reference(reference)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(reference.to_string()))?;

        match transaction.status {
            TransactionStatus::Confirmed => return Ok(VerifyOutcome::Confirmed),
            TransactionStatus::Failed => return Ok(VerifyOutcome::Failed),
            TransactionStatus::Pending => {}
        }

        match self.gateway.verify(reference).await? {
            GatewayVerdict::Success => {
                let won = self
                    .db
                    .transition_transaction(reference, TransactionStatus::Confirmed, Utc::now())
                    .await?;
                if won {
                    info!(reference = %reference, "gateway transaction confirmed");
                    if let Some(hook) = &self.on_confirmed {
                        if let Some(confirmed) =
                            self.db.transaction_by_reference(reference).await?
                        {
                            hook(&confirmed);
                        }
                    }
                }
                // !won: a concurrent verify performed the transition; the
                // verdict is the same either way
                Ok(VerifyOutcome::Confirmed)
            }
            GatewayVerdict::Failed => {
                let won = self
                    .db
                    .transition_transaction(reference, TransactionStatus::Failed, Utc::now())
                    .await?;
                if won {
                    warn!(reference = %reference, "gateway transaction failed");
                }
                Ok(VerifyOutcome::Failed)
            }
            GatewayVerdict::Pending => Ok(VerifyOutcome::Pending),
        }
    }

    /// Current local status for a reference, without touching the gateway.
    pub async fn status(&self, reference: &str) -> Result<TransactionStatus, ReconcileError> {
        let transaction = self
            .db
            .transaction_by_reference(reference)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(reference.to_string()))?;
        Ok(transaction.status)
    }
}
