//! Service Configuration
//! Mission: One place for env-driven settings, with safe defaults for dev

use crate::models::Amount;
use std::env;

/// Policy knobs consumed by the levy ledger.
#[derive(Debug, Clone, Copy)]
pub struct LevyPolicy {
    /// Service-wide default for accepting amounts below the due amount.
    /// Fee rules may override this per market.
    pub allow_partial_default: bool,
    /// Flat collector bonus (minor units) per on-time collection.
    /// Zero disables incentives.
    pub collector_incentive: Amount,
}

impl Default for LevyPolicy {
    fn default() -> Self {
        Self {
            allow_partial_default: false,
            collector_incentive: 0,
        }
    }
}

/// Full service settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: String,
    pub bind_addr: String,

    /// Secret for signing QR identity tokens.
    pub qr_secret: String,
    /// Optional validity window for QR tokens, in seconds. Unset means
    /// tokens never expire.
    pub qr_ttl_secs: Option<i64>,

    pub levy: LevyPolicy,

    /// Payment gateway (Paystack-style) config.
    pub gateway_base_url: String,
    pub gateway_secret_key: String,
    pub gateway_timeout_secs: u64,
    pub gateway_callback_url: String,
}

impl Settings {
    /// Read settings from the environment. Call after dotenv has loaded.
    pub fn from_env() -> Self {
        let db_path = env::var("LEVY_DB_PATH").unwrap_or_else(|_| "marketlevy.db".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let qr_secret = env::var("QR_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-in-production-minimum-32-characters".to_string());

        let qr_ttl_secs = env::var("QR_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0);

        let allow_partial_default = env::var("LEVY_ALLOW_PARTIAL")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);

        let collector_incentive = env::var("COLLECTOR_INCENTIVE")
            .ok()
            .and_then(|v| v.parse::<Amount>().ok())
            .unwrap_or(0);

        let gateway_base_url = env::var("GATEWAY_BASE_URL")
            .unwrap_or_else(|_| "https://api.paystack.co".to_string());

        let gateway_secret_key = env::var("GATEWAY_SECRET_KEY").unwrap_or_default();

        let gateway_timeout_secs = env::var("GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        let gateway_callback_url = env::var("GATEWAY_CALLBACK_URL")
            .unwrap_or_else(|_| "http://localhost:3000/api/payments/callback".to_string());

        Self {
            db_path,
            bind_addr,
            qr_secret,
            qr_ttl_secs,
            levy: LevyPolicy {
                allow_partial_default,
                collector_incentive,
            },
            gateway_base_url,
            gateway_secret_key,
            gateway_timeout_secs,
            gateway_callback_url,
        }
    }
}
