//! Configuration management for the Hourglass Relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub coordinator: CoordinatorConfig,
    pub timelocks: TimelockConfig,
    pub auction: AuctionConfig,
    pub database: DatabaseConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub instance_id: String,
    /// RefundWatcher scan interval
    pub refund_scan_interval_secs: u64,
    /// Bounded retry budget for retryable adapter errors
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Funding confirmation polling
    pub confirm_poll_base_ms: u64,
    pub confirm_poll_max_ms: u64,
    /// Ceiling on waiting for an escrow to reach finality; past this the
    /// swap is escalated instead of polled forever
    pub funding_ceiling_secs: u64,
    pub health_check_interval_secs: u64,
}

/// Timelock offsets applied when a swap record is opened. The destination
/// escrow must always expire strictly before the source escrow.
#[derive(Debug, Clone, Deserialize)]
pub struct TimelockConfig {
    pub dest_offset_secs: u64,
    pub source_offset_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuctionConfig {
    /// Opening acceptable rate as a premium over the intent's implied rate,
    /// in basis points (10_500 = 1.05x)
    pub initial_premium_bps: u32,
    /// Window over which the acceptable rate decays linearly to the floor
    pub decay_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    /// Which leg of the swap this chain plays. Assigning a physical chain to
    /// a role is deployment policy; the engine only enforces the timelock
    /// ordering between the two roles.
    pub role: ChainRole,
    pub kind: ChainKind,
    /// Finalized-state depth: an escrow counts as Funded only this many
    /// blocks after inclusion
    pub confirmation_depth: u64,
    /// Block cadence of the chain (drives the simulated backend's clock)
    pub block_interval_ms: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    Source,
    Dest,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// Deterministic in-process backend
    Simulated,
    /// Backend provided by an out-of-tree chain integration
    External,
}

impl CoordinatorConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn confirm_poll_base(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_base_ms)
    }

    pub fn confirm_poll_max(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_max_ms)
    }

    pub fn funding_ceiling(&self) -> Duration {
        Duration::from_secs(self.funding_ceiling_secs)
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("HOURGLASS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings = toml::from_str(&config_str)
            .with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.timelocks.dest_offset_secs >= self.timelocks.source_offset_secs {
            anyhow::bail!(
                "destination timelock offset ({}s) must be strictly shorter than source ({}s)",
                self.timelocks.dest_offset_secs,
                self.timelocks.source_offset_secs
            );
        }

        if self.auction.initial_premium_bps < 10_000 {
            anyhow::bail!("auction initial premium must be at least 10000 bps (1.0x)");
        }

        let mut sources = 0;
        let mut dests = 0;
        for (name, chain) in self.enabled_chains() {
            if chain.confirmation_depth == 0 {
                anyhow::bail!("chain {} must require at least one confirmation", name);
            }
            match chain.role {
                ChainRole::Source => sources += 1,
                ChainRole::Dest => dests += 1,
            }
        }
        if sources != 1 || dests != 1 {
            anyhow::bail!(
                "exactly one enabled source and one enabled dest chain required (got {}/{})",
                sources,
                dests
            );
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get the enabled chain playing a given role
    pub fn chain_for_role(&self, role: ChainRole) -> Option<&ChainConfig> {
        self.chains
            .values()
            .find(|c| c.enabled && c.role == role)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> &'static str {
        r#"
            [coordinator]
            instance_id = "test-1"
            refund_scan_interval_secs = 5
            max_retries = 3
            retry_base_delay_ms = 50
            retry_max_delay_ms = 500
            confirm_poll_base_ms = 20
            confirm_poll_max_ms = 200
            funding_ceiling_secs = 60
            health_check_interval_secs = 30

            [timelocks]
            dest_offset_secs = 3600
            source_offset_secs = 7200

            [auction]
            initial_premium_bps = 10500
            decay_window_secs = 120

            [database]
            url = "sqlite::memory:"
            max_connections = 1

            [metrics]
            enabled = false
            port = 9099

            [chains.evm]
            chain_id = 1
            name = "evm-local"
            role = "source"
            kind = "simulated"
            confirmation_depth = 2
            block_interval_ms = 1000
            enabled = true

            [chains.action]
            chain_id = 2
            name = "action-local"
            role = "dest"
            kind = "simulated"
            confirmation_depth = 2
            block_interval_ms = 1000
            enabled = true
        "#
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn parses_and_validates_sample() {
        let settings: Settings = toml::from_str(sample_config()).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.chain_for_role(ChainRole::Source).unwrap().chain_id, 1);
        assert_eq!(settings.chain_for_role(ChainRole::Dest).unwrap().chain_id, 2);
    }

    #[test]
    fn rejects_inverted_timelocks() {
        let mut settings: Settings = toml::from_str(sample_config()).unwrap();
        settings.timelocks.dest_offset_secs = 7200;
        settings.timelocks.source_offset_secs = 3600;
        assert!(settings.validate().is_err());
    }
}
