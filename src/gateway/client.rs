//! Payment Gateway Client
//! Mission: One bounded round-trip per call to the external processor
//!
//! The HTTP client speaks a Paystack-style JSON protocol. No retries live
//! here: `Unavailable` is transient and callers re-invoke, `Rejected` means
//! the gateway explicitly declined.

use crate::models::Amount;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Gateway failure split along the retry boundary.
#[derive(Debug)]
pub enum GatewayError {
    /// Transport-level failure (timeout, connect, 5xx). Safe to retry.
    Unavailable(String),
    /// The gateway explicitly declined. Terminal.
    Rejected(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Unavailable(msg) => write!(f, "gateway unavailable: {}", msg),
            GatewayError::Rejected(msg) => write!(f, "gateway rejected: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Successful initialization: where to send the payer, and the reference
/// the gateway will report back under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInit {
    pub authorization_url: String,
    pub reference: String,
}

/// Verification verdict from the gateway's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayVerdict {
    Success,
    Failed,
    /// The payer has not completed the flow yet.
    Pending,
}

/// Seam to the external processor. The production impl is HTTP; tests plug
/// in a scripted mock.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(
        &self,
        amount: Amount,
        payer: &str,
        callback_url: &str,
        reference: &str,
    ) -> Result<GatewayInit, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<GatewayVerdict, GatewayError>;
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

#[derive(Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    /// Minor currency units, as the processor expects.
    amount: Amount,
    reference: &'a str,
    callback_url: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    fn classify_status(status: StatusCode, body_message: Option<String>) -> GatewayError {
        let msg = body_message.unwrap_or_else(|| format!("HTTP {}", status));
        if status.is_server_error() {
            GatewayError::Unavailable(msg)
        } else {
            GatewayError::Rejected(msg)
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn initialize(
        &self,
        amount: Amount,
        payer: &str,
        callback_url: &str,
        reference: &str,
    ) -> Result<GatewayInit, GatewayError> {
        let url = format!("{}/transaction/initialize", self.base_url);
        debug!(reference = %reference, amount, "initializing gateway transaction");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&InitializeBody {
                email: payer,
                amount,
                reference,
                callback_url,
            })
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        let envelope: Envelope<InitializeData> = response
            .json()
            .await
            .context("decode initialize response")
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !status.is_success() || !envelope.status {
            warn!(reference = %reference, %status, "gateway declined initialization");
            return Err(Self::classify_status(status, envelope.message));
        }

        let data = envelope
            .data
            .ok_or_else(|| GatewayError::Unavailable("initialize response missing data".into()))?;

        Ok(GatewayInit {
            authorization_url: data.authorization_url,
            reference: data.reference,
        })
    }

    async fn verify(&self, reference: &str) -> Result<GatewayVerdict, GatewayError> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);
        debug!(reference = %reference, "verifying gateway transaction");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        let envelope: Envelope<VerifyData> = response
            .json()
            .await
            .context("decode verify response")
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !status.is_success() || !envelope.status {
            return Err(Self::classify_status(status, envelope.message));
        }

        let data = envelope
            .data
            .ok_or_else(|| GatewayError::Unavailable("verify response missing data".into()))?;

        match data.status.as_str() {
            "success" => Ok(GatewayVerdict::Success),
            "failed" => Ok(GatewayVerdict::Failed),
            // "abandoned", "ongoing", "pending" and friends: not settled yet
            _ => Ok(GatewayVerdict::Pending),
        }
    }
}
