//! Svix-style webhook signatures.
//!
//! The provider signs `"{id}.{timestamp}.{body}"` with HMAC-SHA256 keyed by
//! the base64 secret that follows the `whsec_` prefix, and sends the result
//! as space-separated `v1,<base64>` entries in `svix-signature`.

use autopilot_core::error::AutopilotError;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::secrets::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_ID: &str = "svix-id";
pub const HEADER_TIMESTAMP: &str = "svix-timestamp";
pub const HEADER_SIGNATURE: &str = "svix-signature";

const SECRET_PREFIX: &str = "whsec_";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("webhook secret not configured")]
    NotConfigured,
    #[error("webhook secret is not valid base64")]
    InvalidSecret,
    #[error("missing signature headers")]
    MissingHeaders,
    #[error("timestamp outside tolerance")]
    StaleTimestamp,
    #[error("signature mismatch")]
    Mismatch,
}

impl SignatureError {
    /// Our own misconfiguration, as opposed to a bad request.
    pub fn is_server_fault(&self) -> bool {
        matches!(self, Self::NotConfigured | Self::InvalidSecret)
    }
}

impl From<SignatureError> for AutopilotError {
    fn from(e: SignatureError) -> Self {
        if e.is_server_fault() {
            AutopilotError::Config(e.to_string())
        } else {
            AutopilotError::Security(e.to_string())
        }
    }
}

/// The three signature headers, borrowed from the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignedHeaders<'a> {
    pub id: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
}

/// Verifies inbound delivery webhooks.
#[derive(Clone)]
pub struct WebhookVerifier {
    key: Vec<u8>,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    /// Build from a `whsec_...` secret (the prefix is optional).
    pub fn new(secret: &str, tolerance_secs: i64) -> Result<Self, SignatureError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(SignatureError::NotConfigured);
        }
        let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
        let key = BASE64
            .decode(encoded)
            .map_err(|_| SignatureError::InvalidSecret)?;
        Ok(Self {
            key,
            tolerance_secs,
        })
    }

    /// Compute the `v1,<base64>` signature for a message.
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> String {
        format!("v1,{}", BASE64.encode(self.mac(id, &timestamp.to_string(), body)))
    }

    fn mac(&self, id: &str, timestamp: &str, body: &[u8]) -> Vec<u8> {
        // Any key length is accepted by HMAC.
        let mut mac = match HmacSha256::new_from_slice(&self.key) {
            Ok(m) => m,
            Err(_) => return Vec::new(),
        };
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.finalize().into_bytes().to_vec()
    }

    /// Verify a request against `now`.
    pub fn verify(
        &self,
        headers: SignedHeaders<'_>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let (Some(id), Some(ts), Some(sigs)) = (headers.id, headers.timestamp, headers.signature)
        else {
            return Err(SignatureError::MissingHeaders);
        };
        let ts = ts.trim();
        let seconds: i64 = ts.parse().map_err(|_| SignatureError::StaleTimestamp)?;
        if now.timestamp().abs_diff(seconds) > self.tolerance_secs.unsigned_abs() {
            tracing::debug!("🔏 Webhook timestamp {seconds} outside tolerance");
            return Err(SignatureError::StaleTimestamp);
        }

        let expected = BASE64.encode(self.mac(id.trim(), ts, body));
        let matched = sigs
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == "v1")
            .any(|(_, sig)| constant_time_eq(sig.as_bytes(), expected.as_bytes()));
        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}
