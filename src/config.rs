//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the push-service API key) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::engine::betting::BetLimits;
use crate::engine::chat::GroupFallback;
use crate::escrow::EscrowParams;
use crate::types::{parse_ether, Address, FeedId, Wei};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub app: AppSection,
    pub escrow: EscrowConfig,
    pub oracle: OracleConfig,
    pub messaging: MessagingConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
    pub state_file: String,
    pub keeper_interval_secs: u64,
    /// Account that pays oracle fees and submits resolutions.
    pub keeper_account: Address,
    pub auto_resolve: bool,
    /// Ether minted to the keeper account on a fresh start.
    #[serde(default = "default_keeper_float")]
    pub keeper_float_eth: String,
}

fn default_keeper_float() -> String {
    "0.1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EscrowConfig {
    pub contract_address: Address,
    pub min_bet_eth: String,
    pub max_bet_eth: String,
    pub bet_duration_secs: u64,
    pub placement_max_price_age_secs: u64,
    /// House liquidity deposited into the contract on a fresh start.
    pub house_seed_eth: String,
}

impl EscrowConfig {
    pub fn params(&self) -> Result<EscrowParams> {
        Ok(EscrowParams {
            min_bet: self.min_bet()?,
            bet_duration: self.bet_duration_secs,
            placement_max_price_age: self.placement_max_price_age_secs,
        })
    }

    pub fn limits(&self) -> Result<BetLimits> {
        let limits = BetLimits {
            min: self.min_bet()?,
            max: parse_ether(&self.max_bet_eth).context("escrow.max_bet_eth")?,
        };
        if limits.max < limits.min {
            anyhow::bail!("escrow.max_bet_eth is below escrow.min_bet_eth");
        }
        Ok(limits)
    }

    pub fn house_seed(&self) -> Result<Wei> {
        parse_ether(&self.house_seed_eth).context("escrow.house_seed_eth")
    }

    fn min_bet(&self) -> Result<Wei> {
        parse_ether(&self.min_bet_eth).context("escrow.min_bet_eth")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    /// Push-service base URL; the public instance when unset.
    #[serde(default)]
    pub hermes_url: Option<String>,
    /// Env var holding a bearer token for hosted push-service providers.
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub price_feed_id: FeedId,
    pub oracle_address: Address,
    /// TOML integers are 64-bit; widened to `Wei` by `update_fee`.
    pub update_fee_wei: u64,
    pub request_timeout_secs: u64,
}

impl OracleConfig {
    pub fn update_fee(&self) -> Wei {
        Wei::from(self.update_fee_wei)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessagingConfig {
    /// Messaging network. Only "local" has an in-process adapter.
    pub environment: String,
    pub groups_enabled: bool,
    #[serde(default)]
    pub group_fallback: GroupFallback,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        // Surface bad amounts at startup rather than on first use.
        config.escrow.params()?;
        config.escrow.limits()?;
        config.escrow.house_seed()?;
        parse_ether(&config.app.keeper_float_eth).context("app.keeper_float_eth")?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::{BET_DURATION, MIN_BET, PLACEMENT_MAX_PRICE_AGE};
    use crate::types::{ETH_USD_FEED, WEI_PER_ETHER};

    const SAMPLE: &str = r#"
        [app]
        name = "WAGERCHAT-local"
        state_file = "wagerchat_state.json"
        keeper_interval_secs = 15
        keeper_account = "0x000000000000000000000000000000000000cafe"
        auto_resolve = true

        [escrow]
        contract_address = "0x00000000000000000000000000000000000e5c20"
        min_bet_eth = "0.001"
        max_bet_eth = "1"
        bet_duration_secs = 300
        placement_max_price_age_secs = 60
        house_seed_eth = "10"

        [oracle]
        price_feed_id = "0xff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace"
        oracle_address = "0x0000000000000000000000000000000000000a11"
        update_fee_wei = 1
        request_timeout_secs = 10

        [messaging]
        environment = "local"
        groups_enabled = false
        group_fallback = "first_direct"

        [api]
        enabled = true
        port = 8080
    "#;

    #[test]
    fn test_parse_sample() {
        let cfg = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.app.name, "WAGERCHAT-local");
        assert_eq!(cfg.app.keeper_float_eth, "0.1");
        assert_eq!(cfg.oracle.price_feed_id, ETH_USD_FEED.parse().unwrap());
        assert!(cfg.oracle.hermes_url.is_none());
        assert_eq!(cfg.messaging.group_fallback, GroupFallback::FirstDirect);
        assert_eq!(cfg.api.port, 8080);
        assert_eq!(cfg.oracle.update_fee(), 1);
    }

    #[test]
    fn test_escrow_conversions() {
        let cfg = AppConfig::parse(SAMPLE).unwrap();
        let params = cfg.escrow.params().unwrap();
        assert_eq!(params.min_bet, MIN_BET);
        assert_eq!(params.bet_duration, BET_DURATION);
        assert_eq!(params.placement_max_price_age, PLACEMENT_MAX_PRICE_AGE);
        assert_eq!(cfg.escrow.limits().unwrap().max, WEI_PER_ETHER);
        assert_eq!(cfg.escrow.house_seed().unwrap(), 10 * WEI_PER_ETHER);
    }

    #[test]
    fn test_group_fallback_defaults_to_reject() {
        let without = SAMPLE.replace("group_fallback = \"first_direct\"", "");
        let cfg = AppConfig::parse(&without).unwrap();
        assert_eq!(cfg.messaging.group_fallback, GroupFallback::Reject);
    }

    #[test]
    fn test_bad_amount_rejected_at_load() {
        let bad = SAMPLE.replace("max_bet_eth = \"1\"", "max_bet_eth = \"0.0001\"");
        assert!(AppConfig::parse(&bad).is_err());
    }

    #[test]
    fn test_bad_address_rejected() {
        let bad = SAMPLE.replace("0x000000000000000000000000000000000000cafe", "cafe");
        assert!(AppConfig::parse(&bad).is_err());
    }

    #[test]
    fn test_load_repo_config() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml");
        let cfg = AppConfig::load(path).unwrap();
        assert!(cfg.app.keeper_interval_secs > 0);
        assert_eq!(cfg.oracle.update_fee(), 1);
        assert_eq!(cfg.escrow.params().unwrap(), EscrowParams::default());
        assert_eq!(cfg.messaging.environment, "local");
    }

    #[test]
    fn test_large_update_fee_widens() {
        let big = SAMPLE.replace("update_fee_wei = 1", "update_fee_wei = 9000000000000000000");
        let cfg = AppConfig::parse(&big).unwrap();
        assert_eq!(cfg.oracle.update_fee(), 9_000_000_000_000_000_000);
    }
}
