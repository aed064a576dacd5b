use config::{Config, ConfigError};
use serde::Deserialize;
use std::time::Duration;

use crate::rpc_provider::RpcProvider;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub rust_log: String,
    /// Comma-separated JSON-RPC URLs, highest priority first.
    pub rpc_urls: String,
    #[serde(default)]
    pub rpc_auth_header: Option<String>,
    #[serde(default)]
    pub rpc_auth_value: Option<String>,
    pub request_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub stats_interval_secs: u64,
    pub round_to_decimals: u32,
}

impl AppConfig {
    pub fn providers(&self) -> Vec<RpcProvider> {
        self.rpc_urls
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .enumerate()
            .map(|(i, url)| RpcProvider {
                name: format!("rpc-{i}"),
                url: url.to_string(),
                auth_header: self.rpc_auth_header.clone(),
                auth_value: self.rpc_auth_value.clone(),
            })
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    build_config(config::Environment::default())
}

fn build_config(env: config::Environment) -> Result<AppConfig, ConfigError> {
    let settings = Config::builder()
        .add_source(env)
        .set_default("server_port", 8080)?
        .set_default("rust_log", "info")?
        .set_default("rpc_urls", "https://cloudflare-eth.com")?
        .set_default("request_timeout_secs", 30)?
        .set_default("health_check_interval_secs", 60)?
        .set_default("stats_interval_secs", 300)?
        .set_default("round_to_decimals", 2)?
        .build()?;

    settings.try_deserialize()
}
