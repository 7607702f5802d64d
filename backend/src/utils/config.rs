use anyhow::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::db::RetryPolicy;
use crate::hub::HubConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_public_key: String,
    pub allowed_origins: Vec<String>,
    pub hub_idle_grace_secs: u64,
    pub hub_outbound_queue: usize,
    pub hub_unresponsive_secs: u64,
    pub hub_sweep_interval_secs: u64,
    pub store_retry_attempts: u32,
    pub store_retry_base_ms: u64,
    pub store_retry_max_ms: u64,
}

fn env_or<T: FromStr + ToString>(name: &str, default: T) -> T {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let jwt_public_key = match env::var("JWT_PUBLIC_KEY") {
            Ok(pem) => pem,
            Err(_) => {
                let path = env::var("JWT_PUBLIC_KEY_PATH").map_err(|_| {
                    anyhow::anyhow!("JWT_PUBLIC_KEY or JWT_PUBLIC_KEY_PATH must be set")
                })?;
                std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?
            }
        };

        Ok(Self {
            port: env_or("PORT", DEFAULT_SERVER_PORT),
            jwt_public_key,
            allowed_origins: parse_origins(&env::var("ALLOWED_ORIGINS").unwrap_or_default()),
            hub_idle_grace_secs: env_or("HUB_IDLE_GRACE_SECS", DEFAULT_HUB_IDLE_GRACE_SECS),
            hub_outbound_queue: env_or("HUB_OUTBOUND_QUEUE", DEFAULT_HUB_OUTBOUND_QUEUE),
            hub_unresponsive_secs: env_or("HUB_UNRESPONSIVE_SECS", DEFAULT_HUB_UNRESPONSIVE_SECS),
            hub_sweep_interval_secs: env_or(
                "HUB_SWEEP_INTERVAL_SECS",
                DEFAULT_HUB_SWEEP_INTERVAL_SECS,
            ),
            store_retry_attempts: env_or("STORE_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS),
            store_retry_base_ms: env_or("STORE_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS),
            store_retry_max_ms: env_or("STORE_RETRY_MAX_MS", DEFAULT_RETRY_MAX_MS),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.store_retry_attempts,
            Duration::from_millis(self.store_retry_base_ms),
            Duration::from_millis(self.store_retry_max_ms),
        )
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            idle_grace: Duration::from_secs(self.hub_idle_grace_secs),
            outbound_queue: self.hub_outbound_queue.max(1),
            unresponsive_after: Duration::from_secs(self.hub_unresponsive_secs),
            sweep_interval: Duration::from_secs(self.hub_sweep_interval_secs.max(1)),
            retry: self.retry_policy(),
            ..HubConfig::default()
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}
