use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use inlet::{
    Config, InferenceClient, LifecycleCoordinator, PredictionService, WebhookVerifier, transport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let client = Arc::new(InferenceClient::new(
        config.api_base.clone(),
        config.api_token.clone(),
        config.model_version.clone(),
    )?);
    let coordinator = Arc::new(LifecycleCoordinator::new());
    let verifier = WebhookVerifier::new(config.webhook_secret.as_deref())?;
    if !verifier.has_secret() {
        tracing::warn!(
            "REPLICATE_WEBHOOK_SIGNING_SECRET is not set, webhook deliveries will be unvalidated"
        );
    }

    let service = Arc::new(PredictionService::new(
        client,
        coordinator,
        verifier,
        config.poll.clone(),
    ));

    transport::http::serve(config.server.clone(), service).await
}
