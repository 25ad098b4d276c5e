//! QR Identity Codec
//! Mission: Self-describing, tamper-evident trader identity tokens
//!
//! A token is `base64url(payload_json) . base64url(hmac_sha256(payload))`.
//! It resolves a trader at scan time without a network round-trip, but a
//! structurally valid token is only trusted after the caller checks it
//! against the stored `Trader.qr_code` value.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Identity carried inside a QR token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrIdentity {
    pub trader_id: String,
    pub market_id: String,
    pub issued_at: DateTime<Utc>,
}

/// Decode-time failures. `Unknown` (well-formed token, no matching trader)
/// is produced by the caller after the store lookup, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrDecodeError {
    /// Not parseable or signature mismatch.
    Malformed,
    /// Outside the configured validity window.
    Expired,
}

impl fmt::Display for QrDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QrDecodeError::Malformed => write!(f, "malformed QR token"),
            QrDecodeError::Expired => write!(f, "expired QR token"),
        }
    }
}

impl std::error::Error for QrDecodeError {}

/// Compact wire form of the token payload.
#[derive(Serialize, Deserialize)]
struct QrPayload {
    t: String,
    m: String,
    iat: i64,
}

/// Encoder/decoder for signed QR identity tokens.
pub struct QrCodec {
    secret: Vec<u8>,
    /// Optional validity window in seconds; `None` means tokens never expire.
    ttl_secs: Option<i64>,
}

impl QrCodec {
    pub fn new(secret: &str, ttl_secs: Option<i64>) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl_secs,
        }
    }

    /// Encode a trader identity into an opaque token.
    pub fn encode(&self, trader_id: &str, market_id: &str, issued_at: DateTime<Utc>) -> String {
        let payload = QrPayload {
            t: trader_id.to_string(),
            m: market_id.to_string(),
            iat: issued_at.timestamp(),
        };
        // Serialization of a plain struct cannot fail
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap_or_default());
        let signature = URL_SAFE_NO_PAD.encode(self.sign(body.as_bytes()));
        format!("{}.{}", body, signature)
    }

    /// Decode and authenticate a token. Signature and structure checks come
    /// before the expiry check so a tampered token never reports `Expired`.
    pub fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<QrIdentity, QrDecodeError> {
        let (body, signature) = token.split_once('.').ok_or(QrDecodeError::Malformed)?;

        let claimed = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| QrDecodeError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| QrDecodeError::Malformed)?;
        mac.update(body.as_bytes());
        // Constant-time comparison
        mac.verify_slice(&claimed)
            .map_err(|_| QrDecodeError::Malformed)?;

        let raw = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| QrDecodeError::Malformed)?;
        let payload: QrPayload =
            serde_json::from_slice(&raw).map_err(|_| QrDecodeError::Malformed)?;

        let issued_at = Utc
            .timestamp_opt(payload.iat, 0)
            .single()
            .ok_or(QrDecodeError::Malformed)?;

        if let Some(ttl) = self.ttl_secs {
            if now.timestamp() - payload.iat > ttl {
                return Err(QrDecodeError::Expired);
            }
        }

        Ok(QrIdentity {
            trader_id: payload.t,
            market_id: payload.m,
            issued_at,
        })
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        // HMAC-SHA256 accepts any key length
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn codec() -> QrCodec {
        QrCodec::new("test-secret", None)
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let issued = Utc.with_ymd_and_hms(2024, 4, 10, 9, 0, 0).unwrap();
        let token = codec().encode("trader-1", "market-1", issued);

        let identity = codec().decode(&token, Utc::now()).unwrap();
        assert_eq!(identity.trader_id, "trader-1");
        assert_eq!(identity.market_id, "market-1");
        assert_eq!(identity.issued_at, issued);
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert_eq!(
            codec().decode("not-a-token", Utc::now()),
            Err(QrDecodeError::Malformed)
        );
        assert_eq!(
            codec().decode("a.b.c", Utc::now()),
            Err(QrDecodeError::Malformed)
        );
        assert_eq!(codec().decode("", Utc::now()), Err(QrDecodeError::Malformed));
    }

    #[test]
    fn test_tampered_body_is_malformed() {
        let token = codec().encode("trader-1", "market-1", Utc::now());
        let (body, sig) = token.split_once('.').unwrap();
        let forged_body = URL_SAFE_NO_PAD
            .encode(r#"{"t":"trader-2","m":"market-1","iat":0}"#.as_bytes());
        let forged = format!("{}.{}", forged_body, sig);
        assert_ne!(forged_body, body);
        assert_eq!(
            codec().decode(&forged, Utc::now()),
            Err(QrDecodeError::Malformed)
        );
    }

    #[test]
    fn test_wrong_secret_is_malformed() {
        let token = codec().encode("trader-1", "market-1", Utc::now());
        let other = QrCodec::new("another-secret", None);
        assert_eq!(
            other.decode(&token, Utc::now()),
            Err(QrDecodeError::Malformed)
        );
    }

    #[test]
    fn test_expiry_window() {
        let bounded = QrCodec::new("test-secret", Some(3600));
        let issued = Utc.with_ymd_and_hms(2024, 4, 10, 9, 0, 0).unwrap();
        let token = bounded.encode("trader-1", "market-1", issued);

        // Inside the window
        assert!(bounded
            .decode(&token, issued + Duration::minutes(30))
            .is_ok());
        // Outside the window
        assert_eq!(
            bounded.decode(&token, issued + Duration::hours(2)),
            Err(QrDecodeError::Expired)
        );
        // Unbounded codec never expires the same token
        assert!(codec().decode(&token, issued + Duration::days(365)).is_ok());
    }
}
