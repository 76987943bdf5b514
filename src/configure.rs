use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::chain::{RateLimitConfig, RetryPolicy};
use crate::transfer::adapters::BridgeRoute;
use crate::transfer::coordinator::CoordinatorConfig;
use crate::transfer::types::ChainId;
use crate::transfer::worker::WorkerConfig;
use crate::transfer::wrap::WstonSettings;

pub const DEFAULT_CONFIG_FILE: &str = "config/config.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub to_file: bool,
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    pub name: String,
    pub chain_id: ChainId,
    pub rpc_url: String,
    /// Confirmation depth; falls back to `coordinator.default_confirmations`
    #[serde(default)]
    pub confirmations: Option<u64>,
    /// Overrides the global `rate_limit` for this endpoint
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSettings {
    pub poll_interval_ms: u64,
    pub confirmation_timeout_ms: u64,
    #[serde(default)]
    pub destination_timeout_ms: Option<u64>,
    pub default_confirmations: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub log: LogSettings,
    pub db_path: String,
    pub coordinator: CoordinatorSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub chains: Vec<ChainSettings>,
    #[serde(default)]
    pub bridges: Vec<BridgeRoute>,
    /// L1 WSTON deployment used by `wrap`
    #[serde(default)]
    pub wston: Option<WstonSettings>,
}

impl AppConfig {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval_ms: self.coordinator.poll_interval_ms,
            confirmation_timeout_ms: self.coordinator.confirmation_timeout_ms,
            destination_timeout_ms: self.coordinator.destination_timeout_ms,
            default_confirmations: self.coordinator.default_confirmations,
            confirmations: self
                .chains
                .iter()
                .filter_map(|c| c.confirmations.map(|n| (c.chain_id, n)))
                .collect(),
            retry: self.retry.clone(),
        }
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainSettings> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    pub fn bridge(&self, name: &str) -> Option<&BridgeRoute> {
        self.bridges.iter().find(|b| b.name == name)
    }

    /// Every bridge must connect two configured chains
    pub fn validate(&self) -> Result<(), ConfigError> {
        for bridge in &self.bridges {
            for chain in [bridge.source_chain, bridge.dest_chain] {
                if self.chain(chain).is_none() {
                    return Err(ConfigError::Message(format!(
                        "bridge '{}' uses chain {} which is not configured",
                        bridge.name, chain
                    )));
                }
            }
        }
        if let Some(wston) = &self.wston {
            if self.chain(wston.chain_id).is_none() {
                return Err(ConfigError::Message(format!(
                    "wston uses chain {} which is not configured",
                    wston.chain_id
                )));
            }
        }
        Ok(())
    }
}

fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Config::builder()
        // Set defaults
        .set_default("log.level", "info")?
        .set_default("log.to_file", false)?
        .set_default("log.file", "log/bridge.log")?
        .set_default("db_path", "data/transfers")?
        .set_default("coordinator.poll_interval_ms", 15_000i64)?
        .set_default("coordinator.confirmation_timeout_ms", 30 * 60 * 1000i64)?
        .set_default("coordinator.default_confirmations", 1i64)
}

pub fn load_config_from(path: &str) -> Result<AppConfig, ConfigError> {
    let s = builder()?
        // Add configuration from a file
        .add_source(File::with_name(path))
        // Add configuration from environment variables
        .add_source(config::Environment::with_prefix("APP").prefix_separator("_").separator("__"))
        .build()?;

    let config: AppConfig = s.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from a YAML string (no environment overrides)
pub fn parse_config(yaml: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = builder()?
        .add_source(File::from_str(yaml, FileFormat::Yaml))
        .build()?
        .try_deserialize()?;
    config.validate()?;
    Ok(config)
}
