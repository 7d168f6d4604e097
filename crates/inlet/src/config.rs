//! Environment-driven configuration.
//!
//! Every knob the core consumes is collected here once at startup; nothing
//! reads the environment at request time.

use std::time::Duration;

use anyhow::Context as _;

use crate::poller::PollConfig;
use crate::transport::http::ServerConfig;

pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";

#[derive(Debug, Clone)]
pub struct Config {
    /// Provider API base URL.
    pub api_base: String,
    /// Provider credential.
    pub api_token: String,
    /// Version-pinned model identifier, supplied once here rather than per
    /// request.
    pub model_version: String,
    /// Shared webhook signing secret (`whsec_...`). Absent means the
    /// receiver runs in logged, unvalidated mode.
    pub webhook_secret: Option<String>,
    pub poll: PollConfig,
    pub server: ServerConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_token = std::env::var("REPLICATE_API_TOKEN")
            .context("the REPLICATE_API_TOKEN environment variable is not set")?;
        let model_version = std::env::var("INLET_MODEL_VERSION")
            .context("the INLET_MODEL_VERSION environment variable is not set")?;

        let api_base =
            std::env::var("INLET_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let webhook_secret = std::env::var("REPLICATE_WEBHOOK_SIGNING_SECRET").ok();

        let poll = PollConfig {
            interval: env_duration_secs("INLET_POLL_INTERVAL_SECS", 1),
            timeout: env_duration_secs("INLET_POLL_TIMEOUT_SECS", 300),
            max_retries: env_parse("INLET_MAX_RETRIES", 3),
            ..PollConfig::default()
        };

        let server = ServerConfig {
            host: std::env::var("INLET_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("INLET_PORT", 5000),
        };

        Ok(Self {
            api_base,
            api_token,
            model_version,
            webhook_secret,
            poll,
            server,
        })
    }
}

fn env_duration_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(name, default))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}
