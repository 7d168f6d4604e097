//! PredictionService: transport-agnostic prediction lifecycle entry points.
//!
//! Owns the injected inference client, the lifecycle coordinator, the
//! webhook verifier, and the background pollers spawned as a fallback when
//! a submission carries no webhook channel. Transports delegate here; no
//! component writes to the store except through the coordinator.

use std::sync::Arc;

use tokio::sync::watch;

use crate::coordinator::{LifecycleCoordinator, MergeResult, UpdateSource};
use crate::gateway::{GatewayError, InferenceClient, SubmitOptions};
use crate::poller::{PollConfig, PollError, Poller};
use crate::prediction::{CancellationToken, PredictionRequest};
use crate::webhook::{Verification, WebhookPayload, WebhookVerifier};

pub struct PredictionService {
    coordinator: Arc<LifecycleCoordinator>,
    poller: Arc<Poller>,
    client: Arc<InferenceClient>,
    verifier: WebhookVerifier,

    /// Cancels all background pollers on shutdown.
    watch_cancel: CancellationToken,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PredictionService {
    pub fn new(
        client: Arc<InferenceClient>,
        coordinator: Arc<LifecycleCoordinator>,
        verifier: WebhookVerifier,
        poll_config: PollConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = Arc::new(Poller::new(
            Arc::clone(&client),
            Arc::clone(&coordinator),
            poll_config,
        ));
        Self {
            coordinator,
            poller,
            client,
            verifier,
            watch_cancel: CancellationToken::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn coordinator(&self) -> &Arc<LifecycleCoordinator> {
        &self.coordinator
    }

    pub fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    /// Submit a prompt upstream and register the returned prediction.
    ///
    /// When the submission carries no webhook channel, a background poller
    /// is spawned as the fallback path that drives the stored record to a
    /// terminal status.
    pub async fn submit(
        &self,
        prompt: &str,
        options: &SubmitOptions,
    ) -> Result<PredictionRequest, GatewayError> {
        let record = self.client.submit(prompt, options).await?;
        let id = record.id.clone();
        self.coordinator
            .apply_update(record.clone(), UpdateSource::Poll);

        if options.webhook.is_none() {
            self.spawn_watcher(&id);
        }

        Ok(self.coordinator.get(&id).unwrap_or(record))
    }

    /// Fresh provider fetch merged through the coordinator. The response is
    /// the stored record, so a stale provider answer never rolls back a
    /// verified webhook transition.
    pub async fn refresh(&self, id: &str) -> Result<PredictionRequest, GatewayError> {
        match self.client.fetch_status(id).await {
            Ok(record) => {
                self.coordinator.apply_update(record, UpdateSource::Poll);
            }
            // The store may still know an id the provider has expired.
            Err(GatewayError::NotFound(_)) if self.coordinator.exists(id) => {}
            Err(e) => return Err(e),
        }
        self.coordinator
            .get(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    /// Apply one webhook delivery that already passed the receiver.
    pub fn apply_webhook(&self, payload: WebhookPayload, verification: Verification) -> MergeResult {
        let id = payload.id.clone();
        let verified = verification == Verification::Verified;
        let result = self
            .coordinator
            .apply_update(payload.into_request(), UpdateSource::Webhook { verified });
        tracing::info!(
            id = %id,
            verified,
            merge = result.as_str(),
            "webhook delivery processed"
        );
        result
    }

    fn spawn_watcher(&self, id: &str) {
        let poller = Arc::clone(&self.poller);
        let id = id.to_string();
        let cancel = self.watch_cancel.child_token();
        tokio::spawn(async move {
            match poller.watch(&id, cancel).await {
                Ok(record) => {
                    tracing::info!(
                        id = %record.id,
                        status = record.status.as_str(),
                        "prediction reached terminal status"
                    );
                }
                Err(PollError::Cancelled) => {}
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "background poll ended early");
                }
            }
        });
    }

    pub fn trigger_shutdown(&self) {
        self.watch_cancel.cancel();
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}
