//! Inference gateway client.
//!
//! A stateless translator between the provider's HTTP+JSON wire format and
//! the internal `PredictionRequest` shape. Holds no durable state; every
//! call is a fresh provider round-trip.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::prediction::{PredictionRequest, PredictionStatus, deserialize_output};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("prompt must not be empty")]
    Validation,

    #[error("prediction {0} not found")]
    NotFound(String),

    #[error("provider returned {status}: {detail}")]
    Upstream { status: u16, detail: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GatewayError {
    /// Transient errors are worth retrying with backoff; the rest surface
    /// immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Upstream { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::Validation | Self::NotFound(_) => false,
        }
    }
}

/// Per-submission options. The model version is configuration, not an
/// option: it is pinned once at client construction.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// URL the provider should push completion notifications to.
    pub webhook: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatePredictionBody<'a> {
    version: &'a str,
    input: PromptInput<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct PromptInput<'a> {
    prompt: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct WireInput {
    #[serde(default)]
    prompt: String,
}

/// Prediction object as the provider returns it.
#[derive(Debug, Deserialize)]
struct WirePrediction {
    id: String,
    status: PredictionStatus,
    #[serde(default)]
    input: WireInput,
    #[serde(default, deserialize_with = "deserialize_output")]
    output: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

impl WirePrediction {
    fn into_request(self) -> PredictionRequest {
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

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

pub struct InferenceClient {
    http: reqwest::Client,
    base_url: String,
    model_version: String,
}

impl InferenceClient {
    pub fn new(base_url: String, token: String, model_version: String) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = reqwest::header::HeaderValue::from_str(&format!("Token {}", token))?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_version,
        })
    }

    /// Submit a prompt. Returns the provider-assigned prediction, normally
    /// in queued status. Empty prompts are rejected before any network call.
    pub async fn submit(
        &self,
        prompt: &str,
        options: &SubmitOptions,
    ) -> Result<PredictionRequest, GatewayError> {
        if prompt.trim().is_empty() {
            return Err(GatewayError::Validation);
        }

        let body = CreatePredictionBody {
            version: &self.model_version,
            input: PromptInput { prompt },
            webhook: options.webhook.as_deref(),
        };

        let response = self
            .http
            .post(format!("{}/predictions", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(upstream_error(status.as_u16(), response).await);
        }

        let wire: WirePrediction = response.json().await?;
        tracing::info!(id = %wire.id, status = wire.status.as_str(), "prediction submitted");
        Ok(wire.into_request())
    }

    /// Fetch the latest known status for a prediction.
    pub async fn fetch_status(&self, id: &str) -> Result<PredictionRequest, GatewayError> {
        let response = self
            .http
            .get(format!("{}/predictions/{}", self.base_url, id))
            // Never serve a cached prediction; callers depend on a fresh
            // round-trip per poll.
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(upstream_error(status.as_u16(), response).await);
        }

        let wire: WirePrediction = response.json().await?;
        Ok(wire.into_request())
    }
}

async fn upstream_error(status: u16, response: reqwest::Response) -> GatewayError {
    let detail = match response.text().await {
        Ok(body) => match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody {
                detail: Some(detail),
            }) => detail,
            _ if !body.is_empty() => body,
            _ => "no error detail".to_string(),
        },
        Err(_) => "no error detail".to_string(),
    };
    GatewayError::Upstream { status, detail }
}
