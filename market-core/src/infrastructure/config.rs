//! Engine configuration, loaded from TOML.

use std::path::Path;

use fvm_shared::clock::ChainEpoch;
use serde::{Deserialize, Serialize};

use crate::foundation::{MarketError, Result};

fn default_data_dir() -> String {
    "./market-data".to_string()
}

fn default_acceptance_buffer() -> ChainEpoch {
    10
}

fn default_min_piece_size() -> u64 {
    256
}

fn default_max_piece_size() -> u64 {
    1 << 20
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Proposals whose start epoch is closer than this to the current head
    /// are rejected; leaves room to transfer and publish before the deal
    /// would already be expired.
    #[serde(default = "default_acceptance_buffer")]
    pub deal_acceptance_buffer: ChainEpoch,
    /// Ask piece-size bounds used when `add_ask` gets no overrides.
    #[serde(default = "default_min_piece_size")]
    pub default_min_piece_size: u64,
    #[serde(default = "default_max_piece_size")]
    pub default_max_piece_size: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            deal_acceptance_buffer: default_acceptance_buffer(),
            default_min_piece_size: default_min_piece_size(),
            default_max_piece_size: default_max_piece_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir(), provider: ProviderConfig::default() }
    }
}

impl EngineConfig {
    pub fn load_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.trim().is_empty() {
            return Err(MarketError::ConfigError("data_dir must not be empty".to_string()));
        }
        if self.provider.deal_acceptance_buffer < 0 {
            return Err(MarketError::ConfigError("deal_acceptance_buffer must not be negative".to_string()));
        }
        if self.provider.default_min_piece_size > self.provider.default_max_piece_size {
            return Err(MarketError::ConfigError(format!(
                "default_min_piece_size {} exceeds default_max_piece_size {}",
                self.provider.default_min_piece_size, self.provider.default_max_piece_size
            )));
        }
        Ok(())
    }
}
