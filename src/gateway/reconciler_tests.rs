//! Adversarial Reconciler Tests
//!
//! Verify the two-phase lifecycle: no orphan Pending rows on initialization
//! failure, exactly-once confirmation side effects, and cached verdicts on
//! repeated verify calls.

use crate::gateway::client::{GatewayError, GatewayInit, GatewayVerdict, PaymentGateway};
use crate::gateway::reconciler::{GatewayReconciler, ReconcileError, VerifyOutcome};
use crate::models::{Amount, TransactionStatus};
use crate::store::LevyDb;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// =============================================================================
// SCRIPTED MOCK GATEWAY
// =============================================================================

/// Scripted stand-in for the external processor. Echoes the client-chosen
/// reference like the real gateway does, and counts round-trips.
struct MockGateway {
    fail_initialize: bool,
    verdict: Mutex<Result<GatewayVerdict, ()>>,
    last_reference: Mutex<Option<String>>,
    verify_calls: AtomicU32,
}

impl MockGateway {
    fn new() -> Self {
        Self {
            fail_initialize: false,
            verdict: Mutex::new(Ok(GatewayVerdict::Success)),
            last_reference: Mutex::new(None),
            verify_calls: AtomicU32::new(0),
        }
    }

    fn failing_initialize() -> Self {
        Self {
            fail_initialize: true,
            ..Self::new()
        }
    }

    fn set_verdict(&self, verdict: GatewayVerdict) {
        *self.verdict.lock().unwrap() = Ok(verdict);
    }

    /// Next verify call reports a transport failure.
    fn set_unavailable(&self) {
        *self.verdict.lock().unwrap() = Err(());
    }

    fn last_reference(&self) -> Option<String> {
        self.last_reference.lock().unwrap().clone()
    }

    fn verify_count(&self) -> u32 {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initialize(
        &self,
        _amount: Amount,
        _payer: &str,
        _callback_url: &str,
        reference: &str,
    ) -> Result<GatewayInit, GatewayError> {
        *self.last_reference.lock().unwrap() = Some(reference.to_string());
        if self.fail_initialize {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        Ok(GatewayInit {
            authorization_url: format!("https://gateway.test/pay/{}", reference),
            reference: reference.to_string(),
        })
    }

    async fn verify(&self, _reference: &str) -> Result<GatewayVerdict, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        match *self.verdict.lock().unwrap() {
            Ok(verdict) => Ok(verdict),
            Err(()) => Err(GatewayError::Unavailable("timed out".to_string())),
        }
    }
}

fn open_db(dir: &TempDir) -> Arc<LevyDb> {
    let path = dir.path().join("levy.db");
    Arc::new(LevyDb::new(path.to_str().unwrap()).expect("open test db"))
}

// =============================================================================
// INITIALIZE
// =============================================================================

#[tokio::test]
async fn test_initialize_persists_pending_row() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let gateway = Arc::new(MockGateway::new());
    let reconciler = GatewayReconciler::new(db.clone(), gateway.clone());

    let init = reconciler
        .initialize("U1", 100_000, "monthly subscription", "https://app/cb")
        .await
        .unwrap();
    assert!(init.authorization_url.contains(&init.reference));

    let row = db
        .transaction_by_reference(&init.reference)
        .await
        .unwrap()
        .expect("row persisted");
    assert_eq!(row.status, TransactionStatus::Pending);
    assert_eq!(row.amount, 100_000);
    assert_eq!(row.sender_id, "U1");
    assert!(row.confirmed_at.is_none());
}

#[tokio::test]
async fn test_failed_initialize_leaves_no_orphan_row() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let gateway = Arc::new(MockGateway::failing_initialize());
    let reconciler = GatewayReconciler::new(db.clone(), gateway.clone());

    let result = reconciler
        .initialize("U1", 100_000, "monthly subscription", "https://app/cb")
        .await;
    assert!(matches!(
        result,
        Err(ReconcileError::Gateway(GatewayError::Unavailable(_)))
    ));

    // The gateway saw the reference, but nothing was persisted
    let reference = gateway.last_reference().expect("gateway was called");
    assert!(db
        .transaction_by_reference(&reference)
        .await
        .unwrap()
        .is_none());
}

// =============================================================================
// VERIFY
// =============================================================================

#[tokio::test]
async fn test_verify_unknown_reference_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let reconciler = GatewayReconciler::new(db, Arc::new(MockGateway::new()));

    let result = reconciler.verify("never-initialized").await;
    assert!(matches!(result, Err(ReconcileError::NotFound(_))));
}

#[tokio::test]
async fn test_verify_confirms_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let gateway = Arc::new(MockGateway::new());
    let activations = Arc::new(AtomicU32::new(0));
    let counter = activations.clone();
    let reconciler = GatewayReconciler::new(db.clone(), gateway.clone())
        .with_confirmation_hook(move |_txn| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let init = reconciler
        .initialize("U1", 100_000, "monthly subscription", "https://app/cb")
        .await
        .unwrap();

    // Before verify: Pending
    assert_eq!(
        reconciler.status(&init.reference).await.unwrap(),
        TransactionStatus::Pending
    );

    // First verify performs the transition and fires the hook
    let first = reconciler.verify(&init.reference).await.unwrap();
    assert_eq!(first, VerifyOutcome::Confirmed);
    assert_eq!(activations.load(Ordering::SeqCst), 1);

    let row = db
        .transaction_by_reference(&init.reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, TransactionStatus::Confirmed);
    assert!(row.confirmed_at.is_some());

    // Second verify is a cached no-op: same verdict, no hook, no round-trip
    let second = reconciler.verify(&init.reference).await.unwrap();
    assert_eq!(second, VerifyOutcome::Confirmed);
    assert_eq!(activations.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.verify_count(), 1);
}

#[tokio::test]
async fn test_verify_failure_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let gateway = Arc::new(MockGateway::new());
    gateway.set_verdict(GatewayVerdict::Failed);
    let reconciler = GatewayReconciler::new(db.clone(), gateway.clone());

    let init = reconciler
        .initialize("U1", 100_000, "monthly subscription", "https://app/cb")
        .await
        .unwrap();

    assert_eq!(
        reconciler.verify(&init.reference).await.unwrap(),
        VerifyOutcome::Failed
    );

    // Terminal: later verdict changes at the gateway are irrelevant
    gateway.set_verdict(GatewayVerdict::Success);
    assert_eq!(
        reconciler.verify(&init.reference).await.unwrap(),
        VerifyOutcome::Failed
    );
    assert_eq!(gateway.verify_count(), 1);
}

#[tokio::test]
async fn test_verify_pending_is_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let gateway = Arc::new(MockGateway::new());
    gateway.set_verdict(GatewayVerdict::Pending);
    let reconciler = GatewayReconciler::new(db.clone(), gateway.clone());

    let init = reconciler
        .initialize("U1", 100_000, "monthly subscription", "https://app/cb")
        .await
        .unwrap();

    assert_eq!(
        reconciler.verify(&init.reference).await.unwrap(),
        VerifyOutcome::Pending
    );

    // Payer completes the flow; the retry settles it
    gateway.set_verdict(GatewayVerdict::Success);
    assert_eq!(
        reconciler.verify(&init.reference).await.unwrap(),
        VerifyOutcome::Confirmed
    );
    assert_eq!(gateway.verify_count(), 2);
}

#[tokio::test]
async fn test_transport_failure_leaves_row_pending() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let gateway = Arc::new(MockGateway::new());
    gateway.set_unavailable();
    let reconciler = GatewayReconciler::new(db.clone(), gateway.clone());

    let init = reconciler
        .initialize("U1", 100_000, "monthly subscription", "https://app/cb")
        .await
        .unwrap();

    let result = reconciler.verify(&init.reference).await;
    assert!(matches!(
        result,
        Err(ReconcileError::Gateway(GatewayError::Unavailable(_)))
    ));
    assert_eq!(
        reconciler.status(&init.reference).await.unwrap(),
        TransactionStatus::Pending
    );

    // Retry after the outage succeeds
    gateway.set_verdict(GatewayVerdict::Success);
    assert_eq!(
        reconciler.verify(&init.reference).await.unwrap(),
        VerifyOutcome::Confirmed
    );
}
