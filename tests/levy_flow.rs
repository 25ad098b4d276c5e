//! End-to-end levy flow tests
//!
//! Drive the full collection path (seed trader -> QR scan -> duplicate and
//! replay handling -> compliance summary) and the gateway reconciliation
//! path against a real on-disk SQLite store and a scripted gateway.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use marketlevy_backend::config::LevyPolicy;
use marketlevy_backend::dashboard::{DashboardAggregator, Scope};
use marketlevy_backend::gateway::{
    GatewayError, GatewayInit, GatewayReconciler, GatewayVerdict, PaymentGateway, VerifyOutcome,
};
use marketlevy_backend::levy::{LevyError, LevyLedger};
use marketlevy_backend::models::{
    PaymentFrequency, PaymentMethod, PaymentStatus, Trader, TraderStatus,
};
use marketlevy_backend::qr::QrCodec;
use marketlevy_backend::store::LevyDb;

const QR_SECRET: &str = "integration-test-secret";

struct AlwaysSuccessGateway {
    verify_calls: AtomicU32,
}

#[async_trait]
impl PaymentGateway for AlwaysSuccessGateway {
    async fn initialize(
        &self,
        _amount: i64,
        _payer: &str,
        _callback_url: &str,
        reference: &str,
    ) -> Result<GatewayInit, GatewayError> {
        Ok(GatewayInit {
            authorization_url: format!("https://gateway.test/pay/{}", reference),
            reference: reference.to_string(),
        })
    }

    async fn verify(&self, _reference: &str) -> Result<GatewayVerdict, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayVerdict::Success)
    }
}

fn seeded_trader(codec: &QrCodec) -> Trader {
    let token = codec.encode("t-weekly", "m1", Utc::now());
    Trader {
        id: "t-weekly".to_string(),
        market_id: "m1".to_string(),
        collector_id: "gb-1".to_string(),
        business_type: "foodstuff".to_string(),
        payment_frequency: PaymentFrequency::Weekly,
        payment_amount: 50_000,
        status: TraderStatus::Active,
        qr_code: Some(token),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_full_collection_flow() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("levy.db");
    let db = Arc::new(LevyDb::new(db_path.to_str().unwrap()).unwrap());

    let codec = QrCodec::new(QR_SECRET, None);
    let trader = seeded_trader(&codec);
    let token = trader.qr_code.clone().unwrap();
    db.upsert_trader(&trader).await.unwrap();

    let ledger = LevyLedger::new(
        db.clone(),
        QrCodec::new(QR_SECRET, None),
        LevyPolicy::default(),
    );

    let scan_day = Utc.with_ymd_and_hms(2024, 4, 10, 9, 30, 0).unwrap();

    // Scan 1: collected for 2024-W15
    let first = ledger
        .scan_and_record(
            &token,
            "gb-1",
            50_000,
            PaymentMethod::Cash,
            Some("R1".to_string()),
            Some(scan_day),
        )
        .await
        .unwrap();
    assert_eq!(first.period_key, "2024-W15");
    assert_eq!(first.status, PaymentStatus::Confirmed);

    // Scan 2, new reference, same week: rejected distinctly
    let duplicate = ledger
        .scan_and_record(
            &token,
            "gb-1",
            50_000,
            PaymentMethod::Cash,
            Some("R2".to_string()),
            Some(scan_day),
        )
        .await;
    assert!(matches!(
        duplicate,
        Err(LevyError::AlreadyPaidForPeriod { .. })
    ));

    // Scan 3 replays R1: the original row comes back
    let replay = ledger
        .scan_and_record(
            &token,
            "gb-1",
            50_000,
            PaymentMethod::Cash,
            Some("R1".to_string()),
            Some(scan_day),
        )
        .await
        .unwrap();
    assert_eq!(replay, first);

    // Dashboard agrees: one payment, fully compliant beat
    let aggregator = DashboardAggregator::new(db.clone());
    let from = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap();
    let summary = aggregator
        .summary(&Scope::Market("m1".to_string()), from, to, scan_day)
        .await
        .unwrap();
    assert_eq!(summary.total_collected, 50_000);
    assert_eq!(summary.compliance_rate, 100.0);
    assert!(summary.outstanding_traders.is_empty());

    // The trader owes again next week
    let next_week = Utc.with_ymd_and_hms(2024, 4, 17, 9, 30, 0).unwrap();
    let due = ledger.outstanding("t-weekly", next_week).await.unwrap();
    assert!(due.is_due);
    assert_eq!(due.period_key, "2024-W16");
}

#[tokio::test]
async fn test_full_gateway_flow() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("levy.db");
    let db = Arc::new(LevyDb::new(db_path.to_str().unwrap()).unwrap());

    let gateway = Arc::new(AlwaysSuccessGateway {
        verify_calls: AtomicU32::new(0),
    });
    let activations = Arc::new(AtomicU32::new(0));
    let counter = activations.clone();
    let reconciler = GatewayReconciler::new(db.clone(), gateway.clone())
        .with_confirmation_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let init = reconciler
        .initialize("U1", 100_000, "subscription", "https://app/cb")
        .await
        .unwrap();
    assert!(!init.reference.is_empty());

    // Pending until verified
    let row = db
        .transaction_by_reference(&init.reference)
        .await
        .unwrap()
        .unwrap();
    assert!(!row.status.is_confirmed());

    // Verify settles it; re-verify is a cached no-op
    assert_eq!(
        reconciler.verify(&init.reference).await.unwrap(),
        VerifyOutcome::Confirmed
    );
    assert_eq!(
        reconciler.verify(&init.reference).await.unwrap(),
        VerifyOutcome::Confirmed
    );
    assert_eq!(activations.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.verify_calls.load(Ordering::SeqCst), 1);
}
