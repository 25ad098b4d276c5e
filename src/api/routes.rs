//! Levy API Routes
//! Mission: Thin HTTP surface over the ledger, reconciler, and dashboard
//!
//! Handlers translate typed domain outcomes into status codes; the core
//! components never see HTTP. Internal failures are logged and masked.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::dashboard::{ComplianceSummary, DashboardAggregator, Scope};
use crate::gateway::{GatewayError, GatewayReconciler, ReconcileError};
use crate::levy::{DueStatus, LevyError, LevyLedger};
use crate::models::{Amount, LevyPayment, PaymentMethod};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LevyLedger>,
    pub reconciler: Arc<GatewayReconciler>,
    pub dashboard: Arc<DashboardAggregator>,
    pub callback_url: String,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/levy/scan", post(scan_levy))
        .route("/api/levy/outstanding/:trader_id", get(get_outstanding))
        .route("/api/payments/initialize", post(initialize_payment))
        .route("/api/payments/verify/:reference", get(verify_payment))
        .route("/api/compliance/summary", get(compliance_summary))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Record a levy payment from a collector's QR scan
async fn scan_levy(
    State(state): State<AppState>,
    Json(request): Json<ScanLevyRequest>,
) -> Result<Json<LevyPayment>, ApiError> {
    let payment = state
        .ledger
        .scan_and_record(
            &request.qr_token,
            &request.collector_id,
            request.amount,
            request.payment_method,
            request.transaction_reference,
            request.as_of,
        )
        .await?;
    Ok(Json(payment))
}

/// Current due status for a trader
async fn get_outstanding(
    State(state): State<AppState>,
    Path(trader_id): Path<String>,
) -> Result<Json<DueStatus>, ApiError> {
    let due = state.ledger.outstanding(&trader_id, Utc::now()).await?;
    Ok(Json(due))
}

/// Start a gateway payment and hand back the redirect target
async fn initialize_payment(
    State(state): State<AppState>,
    Json(request): Json<InitializePaymentRequest>,
) -> Result<Json<InitializePaymentResponse>, ApiError> {
    let init = state
        .reconciler
        .initialize(
            &request.payer_id,
            request.amount,
            &request.description,
            request
                .callback_url
                .as_deref()
                .unwrap_or(&state.callback_url),
        )
        .await?;
    Ok(Json(InitializePaymentResponse {
        redirect_url: init.authorization_url,
        reference: init.reference,
    }))
}

/// Reconcile a gateway transaction by reference
async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<VerifyPaymentResponse>, ApiError> {
    let outcome = state.reconciler.verify(&reference).await?;
    Ok(Json(VerifyPaymentResponse {
        reference,
        status: outcome.as_str().to_string(),
    }))
}

/// Compliance statistics for a market or collector scope
async fn compliance_summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryQuery>,
) -> Result<Json<ComplianceSummary>, ApiError> {
    let scope = match (params.market_id, params.collector_id) {
        (Some(market_id), None) => Scope::Market(market_id),
        (None, Some(collector_id)) => Scope::Collector(collector_id),
        _ => {
            return Err(ApiError::BadRequest(
                "provide exactly one of market_id or collector_id".to_string(),
            ))
        }
    };

    let as_of = params.as_of.unwrap_or_else(Utc::now);
    let to = params.to.unwrap_or(as_of);
    let from = params.from.unwrap_or(to - Duration::days(30));

    let summary = state
        .dashboard
        .summary(&scope, from, to, as_of)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(summary))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct ScanLevyRequest {
    qr_token: String,
    collector_id: String,
    /// Minor currency units
    amount: Amount,
    payment_method: PaymentMethod,
    transaction_reference: Option<String>,
    as_of: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct InitializePaymentRequest {
    payer_id: String,
    amount: Amount,
    description: String,
    /// Overrides the configured callback target
    callback_url: Option<String>,
}

#[derive(Serialize)]
struct InitializePaymentResponse {
    redirect_url: String,
    reference: String,
}

#[derive(Serialize)]
struct VerifyPaymentResponse {
    reference: String,
    status: String,
}

#[derive(Deserialize)]
struct SummaryQuery {
    market_id: Option<String>,
    collector_id: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    as_of: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Levy(LevyError),
    Reconcile(ReconcileError),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<LevyError> for ApiError {
    fn from(err: LevyError) -> Self {
        ApiError::Levy(err)
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        ApiError::Reconcile(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::Levy(err) => {
                let (status, kind) = match err {
                    LevyError::TraderNotFound(_) => (StatusCode::NOT_FOUND, "trader_not_found"),
                    LevyError::TraderSuspended(_) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "trader_suspended")
                    }
                    LevyError::AlreadyPaidForPeriod { .. } => {
                        (StatusCode::CONFLICT, "already_paid_for_period")
                    }
                    LevyError::InsufficientAmount { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_amount")
                    }
                    LevyError::MalformedQr => (StatusCode::BAD_REQUEST, "malformed_qr"),
                    LevyError::ExpiredQr => (StatusCode::GONE, "expired_qr"),
                    LevyError::UnknownQr => (StatusCode::NOT_FOUND, "unknown_qr"),
                    LevyError::Internal(err) => {
                        tracing::error!("levy internal error: {:#}", err);
                        return internal_response();
                    }
                };
                (status, kind, err.to_string())
            }
            ApiError::Reconcile(err) => {
                let (status, kind) = match err {
                    ReconcileError::NotFound(_) => (StatusCode::NOT_FOUND, "transaction_not_found"),
                    ReconcileError::Gateway(GatewayError::Unavailable(_)) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "gateway_unavailable")
                    }
                    ReconcileError::Gateway(GatewayError::Rejected(_)) => {
                        (StatusCode::PAYMENT_REQUIRED, "gateway_rejected")
                    }
                    ReconcileError::Internal(err) => {
                        tracing::error!("reconciler internal error: {:#}", err);
                        return internal_response();
                    }
                };
                (status, kind, err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::Internal(err) => {
                tracing::error!("internal error: {:#}", err);
                return internal_response();
            }
        };

        let body = Json(json!({
            "error": kind,
            "message": message,
        }));

        (status, body).into_response()
    }
}

fn internal_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "internal",
            "message": "Internal server error",
        })),
    )
        .into_response()
}
