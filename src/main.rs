//! Market Levy Backend Server
//! Mission: Levy collection and payment reconciliation for market authorities

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use marketlevy_backend::api::{create_router, AppState};
use marketlevy_backend::config::Settings;
use marketlevy_backend::dashboard::DashboardAggregator;
use marketlevy_backend::gateway::{GatewayReconciler, HttpGateway};
use marketlevy_backend::levy::LevyLedger;
use marketlevy_backend::models::{FeeRule, PaymentFrequency, Trader, TraderStatus};
use marketlevy_backend::qr::QrCodec;
use marketlevy_backend::store::LevyDb;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "marketlevy", about = "Market levy administration backend")]
struct Args {
    /// SQLite database path
    #[arg(long, env = "LEVY_DB_PATH")]
    db_path: Option<String>,

    /// Bind address for the API server
    #[arg(long, env = "BIND_ADDR")]
    bind: Option<String>,

    /// Seed a demo market with two traders and print their QR tokens
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let args = Args::parse();
    let mut settings = Settings::from_env();
    if let Some(db_path) = args.db_path {
        settings.db_path = db_path;
    }
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }

    info!("🏪 Market Levy Backend starting");

    let db = Arc::new(LevyDb::new(&settings.db_path)?);

    if args.seed_demo {
        seed_demo(&db, &settings).await?;
    }

    let ledger = Arc::new(LevyLedger::new(
        db.clone(),
        QrCodec::new(&settings.qr_secret, settings.qr_ttl_secs),
        settings.levy,
    ));

    let gateway = Arc::new(HttpGateway::new(
        &settings.gateway_base_url,
        &settings.gateway_secret_key,
        Duration::from_secs(settings.gateway_timeout_secs),
    ));
    let reconciler = Arc::new(
        GatewayReconciler::new(db.clone(), gateway).with_confirmation_hook(|txn| {
            info!(
                reference = %txn.reference,
                sender = %txn.sender_id,
                amount = txn.amount,
                "💳 subscription payment confirmed"
            );
        }),
    );

    let dashboard = Arc::new(DashboardAggregator::new(db.clone()));

    let app = create_router(AppState {
        ledger,
        reconciler,
        dashboard,
        callback_url: settings.gateway_callback_url.clone(),
    })
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    info!("🎯 API server listening on {}", settings.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Seed one demo market so a fresh checkout has something to scan.
async fn seed_demo(db: &Arc<LevyDb>, settings: &Settings) -> Result<()> {
    let codec = QrCodec::new(&settings.qr_secret, settings.qr_ttl_secs);
    let market_id = "market-demo".to_string();

    db.set_fee_rule(
        &market_id,
        None,
        FeeRule {
            amount: 50_000,
            allow_partial: None,
        },
    )
    .await?;

    for (name, frequency) in [
        ("trader-demo-weekly", PaymentFrequency::Weekly),
        ("trader-demo-daily", PaymentFrequency::Daily),
    ] {
        let token = codec.encode(name, &market_id, chrono::Utc::now());
        db.upsert_trader(&Trader {
            id: name.to_string(),
            market_id: market_id.clone(),
            collector_id: format!("collector-{}", Uuid::new_v4().simple()),
            business_type: "foodstuff".to_string(),
            payment_frequency: frequency,
            payment_amount: 50_000,
            status: TraderStatus::Active,
            qr_code: Some(token.clone()),
            created_at: chrono::Utc::now(),
        })
        .await?;
        info!("🌱 seeded {} with QR token: {}", name, token);
    }

    Ok(())
}

/// Initialize tracing with env-filter overrides
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketlevy_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
