//! Client poller - pull-path status refresh.
//!
//! One bounded, cancellable loop per watched prediction. Each poll response
//! goes through the lifecycle coordinator, so a verified webhook landing
//! mid-poll wins over a stale provider answer.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::coordinator::{LifecycleCoordinator, UpdateSource};
use crate::gateway::{GatewayError, InferenceClient};
use crate::prediction::{CancellationToken, PredictionRequest};

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between successful poll attempts.
    pub interval: Duration,
    /// Wall-clock bound for one watch. Hitting it surfaces Timeout; the
    /// stored record is left as-is, never forced to failed.
    pub timeout: Duration,
    /// Retries per poll attempt on transient transport errors.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("polling timed out before the prediction reached a terminal state")]
    Timeout,

    #[error("prediction {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Upstream(GatewayError),

    #[error("polling was cancelled")]
    Cancelled,
}

pub struct Poller {
    client: Arc<InferenceClient>,
    coordinator: Arc<LifecycleCoordinator>,
    config: PollConfig,
}

impl Poller {
    pub fn new(
        client: Arc<InferenceClient>,
        coordinator: Arc<LifecycleCoordinator>,
        config: PollConfig,
    ) -> Self {
        Self {
            client,
            coordinator,
            config,
        }
    }

    /// Poll until the prediction is terminal, the timeout elapses, or the
    /// caller cancels. Returns the merged stored record on completion.
    pub async fn watch(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<PredictionRequest, PollError> {
        let deadline = Instant::now() + self.config.timeout;

        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                result = self.fetch_with_retry(id, deadline) => result?,
            };

            self.coordinator.apply_update(fetched, UpdateSource::Poll);

            // Read back the merged view - the push path may have advanced
            // the record past what this poll observed.
            let merged = self
                .coordinator
                .get(id)
                .ok_or_else(|| PollError::NotFound(id.to_string()))?;
            if merged.is_terminal() {
                return Ok(merged);
            }

            if Instant::now() + self.config.interval >= deadline {
                tracing::warn!(id, "poll timeout reached without terminal status");
                return Err(PollError::Timeout);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// One poll attempt with bounded exponential backoff on transient
    /// failures. A single transient failure must not abort the whole wait.
    async fn fetch_with_retry(
        &self,
        id: &str,
        deadline: Instant,
    ) -> Result<PredictionRequest, PollError> {
        let mut attempt = 0u32;
        loop {
            match self.client.fetch_status(id).await {
                Ok(record) => return Ok(record),
                Err(GatewayError::NotFound(id)) => return Err(PollError::NotFound(id)),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(PollError::Upstream(e));
                    }
                    let backoff = self.config.backoff_base * (1 << attempt.min(10));
                    tracing::warn!(
                        id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient poll failure, retrying"
                    );
                    if Instant::now() + backoff >= deadline {
                        return Err(PollError::Timeout);
                    }
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(PollError::Upstream(e)),
            }
        }
    }
}
