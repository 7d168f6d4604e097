//! inlet: prediction lifecycle coordinator for hosted inference providers.
//!
//! Submissions go out through the inference gateway client; status comes
//! back on two paths - polling and signed webhooks - and both are merged
//! into one consistent per-id record by the lifecycle coordinator.

pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod poller;
mod prediction;
pub mod service;
pub mod transport;
pub mod webhook;

pub use config::Config;
pub use coordinator::{LifecycleCoordinator, MergeResult, UpdateSource};
pub use gateway::{GatewayError, InferenceClient, SubmitOptions};
pub use poller::{PollConfig, PollError, Poller};
pub use prediction::{CancellationToken, PredictionRequest, PredictionStatus};
pub use service::PredictionService;
pub use webhook::{Verification, WebhookError, WebhookPayload, WebhookVerifier};
