//! Webhook verification and payload parsing.
//!
//! The provider signs each delivery with HMAC-SHA256 over
//! `{webhook-id}.{webhook-timestamp}.{body}`, base64-encoded into the
//! `webhook-signature` header as space-separated `v1,<base64>` entries.
//! The shared secret is distributed as `whsec_<base64-key>`.
//!
//! Identical deliveries can arrive multiple times and out of order; the
//! lifecycle coordinator makes applying them idempotent.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use chrono::Utc;

use crate::prediction::{PredictionRequest, PredictionStatus, deserialize_output};

type HmacSha256 = Hmac<Sha256>;

const SECRET_PREFIX: &str = "whsec_";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("webhook signature is invalid")]
    Authentication,

    #[error("webhook signing secret is malformed")]
    MalformedSecret,

    #[error("malformed webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// How a delivery passed the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Signature checked out against the configured secret.
    Verified,
    /// No secret is configured. Explicit degraded mode - the update is
    /// flagged as unauthenticated, never silently trusted.
    Unvalidated,
}

#[derive(Debug)]
pub struct WebhookVerifier {
    key: Option<Vec<u8>>,
}

impl WebhookVerifier {
    pub fn new(secret: Option<&str>) -> Result<Self, WebhookError> {
        let key = match secret {
            Some(secret) => {
                let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
                let key = BASE64
                    .decode(encoded)
                    .map_err(|_| WebhookError::MalformedSecret)?;
                Some(key)
            }
            None => None,
        };
        Ok(Self { key })
    }

    pub fn has_secret(&self) -> bool {
        self.key.is_some()
    }

    /// Verify one delivery. Headers are optional so that the no-secret
    /// degraded mode does not require the provider to send them; with a
    /// secret configured, a missing header is an authentication failure.
    pub fn verify(
        &self,
        msg_id: Option<&str>,
        timestamp: Option<&str>,
        signatures: Option<&str>,
        body: &[u8],
    ) -> Result<Verification, WebhookError> {
        let Some(ref key) = self.key else {
            tracing::warn!("no webhook signing secret configured, accepting delivery unvalidated");
            return Ok(Verification::Unvalidated);
        };

        let msg_id = msg_id.ok_or(WebhookError::MissingHeader("webhook-id"))?;
        let timestamp = timestamp.ok_or(WebhookError::MissingHeader("webhook-timestamp"))?;
        let signatures = signatures.ok_or(WebhookError::MissingHeader("webhook-signature"))?;

        let mut mac =
            HmacSha256::new_from_slice(key).map_err(|_| WebhookError::MalformedSecret)?;
        mac.update(msg_id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);

        // The header may carry several versioned signatures; any single
        // match authenticates the delivery.
        for entry in signatures.split_whitespace() {
            let encoded = entry.split_once(',').map(|(_, sig)| sig).unwrap_or(entry);
            let Ok(decoded) = BASE64.decode(encoded) else {
                continue;
            };
            if mac.clone().verify_slice(&decoded).is_ok() {
                return Ok(Verification::Verified);
            }
        }

        Err(WebhookError::Authentication)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PayloadInput {
    #[serde(default)]
    prompt: String,
}

/// Webhook delivery body: the prediction object as the provider sees it.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    input: PayloadInput,
    #[serde(default, deserialize_with = "deserialize_output")]
    pub output: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl WebhookPayload {
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn into_request(self) -> PredictionRequest {
        let now = Utc::now();
        PredictionRequest {
            id: self.id,
            prompt: self.input.prompt,
            status: self.status,
            output: self.output,
            error: self.error,
            created_at: now,
            updated_at: now,
            webhook_verified: false,
        }
    }
}
