//! Prediction state model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    /// Accepted by the provider, not yet running. The provider reports
    /// freshly created predictions as "starting".
    #[serde(alias = "starting")]
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl PredictionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Position in the monotonic ordering queued < processing < terminal.
    /// Both terminal statuses share a rank; disagreeing terminals are a
    /// conflict, not a transition.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Processing => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }
}

/// One tracked unit of work: a submitted prompt and its eventual result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Opaque identifier assigned by the provider on submission.
    pub id: String,
    #[serde(default)]
    pub prompt: String,
    pub status: PredictionStatus,
    /// Result artifact URIs, empty until terminal success.
    #[serde(default)]
    pub output: Vec<String>,
    /// Set only when status is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// True only if the last status transition arrived via a
    /// cryptographically validated webhook.
    #[serde(default)]
    pub webhook_verified: bool,
}

impl PredictionRequest {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Providers encode output as null, a single value, or a list of values
/// depending on the model. Normalize all three to a list of strings.
pub(crate) fn deserialize_output<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::String(s) => vec![s],
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
            .collect(),
        other => vec![other.to_string()],
    })
}
