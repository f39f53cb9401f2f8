//! Resolver runtime configuration.
//!
//! Built in three layers: serde defaults, an optional TOML file named by
//! `RESOLVER_CONFIG`, then environment variables, which always win.

use alloy::primitives::{Address, U256};
use resolver_chain::GasParams;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::u256_math::decimal_to_wad;

/// Environment variable naming the optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "RESOLVER_CONFIG";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to read config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Main configuration structure containing all resolver parameters.
#[derive(Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// JSON-RPC endpoint
    #[serde(default)]
    pub rpc_url: String,

    /// Operating wallet key (hex, with or without `0x`)
    #[serde(default, skip_serializing)]
    pub private_key: String,

    /// Order store connection string; `memory://` selects the in-process store
    #[serde(default)]
    pub database_url: String,

    /// Limit-order protocol contract settlements are sent to
    #[serde(default)]
    pub settlement_contract: Option<Address>,

    /// Base URL of the price source
    #[serde(default)]
    pub price_api_url: String,

    /// Bearer token for the price source
    #[serde(default, skip_serializing)]
    pub price_api_token: Option<String>,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Delay between ticks (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum net profit (USD) required to settle
    #[serde(default = "default_min_profit")]
    pub min_profit_usd: Decimal,

    /// Gas pricing model ("eip1559" or "legacy")
    #[serde(default = "default_gas_pricing")]
    pub gas_pricing: String,

    /// Max fee per gas (gwei); also the gas price used for profit estimates
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price_gwei: f64,

    /// Priority fee (gwei), EIP-1559 only
    #[serde(default = "default_priority_fee")]
    pub priority_fee_gwei: f64,

    /// Gas limit attached to settlement transactions
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Gas units assumed by the profitability estimate
    #[serde(default = "default_estimated_gas_units")]
    pub estimated_gas_units: u64,

    /// Native balance reserve below which nothing is submitted
    #[serde(default = "default_min_native_balance")]
    pub min_native_balance_eth: Decimal,

    /// Longest wait for a settlement receipt (seconds)
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Receipt poll interval (milliseconds)
    #[serde(default = "default_receipt_poll")]
    pub receipt_poll_ms: u64,

    /// Price cache TTL (seconds)
    #[serde(default = "default_price_ttl")]
    pub price_cache_ttl_secs: u64,

    /// Price source id of the native gas token
    #[serde(default = "default_native_price_id")]
    pub native_price_id: String,

    /// Native token price (USD) used when the price source has none
    #[serde(default = "default_fallback_native_price")]
    pub fallback_native_price_usd: Decimal,

    /// Run an `eth_call` of the fill before submitting it
    #[serde(default = "default_true")]
    pub simulate_before_submit: bool,

    /// Token registry TOML file
    #[serde(default)]
    pub tokens_file: Option<String>,
}

fn default_chain_id() -> u64 {
    1
}
fn default_poll_interval() -> u64 {
    10
}
fn default_min_profit() -> Decimal {
    Decimal::ONE
}
fn default_gas_pricing() -> String {
    "eip1559".to_string()
}
fn default_max_gas_price() -> f64 {
    50.0
}
fn default_priority_fee() -> f64 {
    2.0
}
fn default_gas_limit() -> u64 {
    300_000
}
fn default_estimated_gas_units() -> u64 {
    200_000
}
fn default_min_native_balance() -> Decimal {
    Decimal::new(1, 2)
}
fn default_confirmation_timeout() -> u64 {
    120
}
fn default_receipt_poll() -> u64 {
    1000
}
fn default_price_ttl() -> u64 {
    30
}
fn default_native_price_id() -> String {
    "eth".to_string()
}
fn default_fallback_native_price() -> Decimal {
    Decimal::from(2000)
}
fn default_true() -> bool {
    true
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            private_key: String::new(),
            database_url: String::new(),
            settlement_contract: None,
            price_api_url: String::new(),
            price_api_token: None,
            chain_id: default_chain_id(),
            poll_interval_secs: default_poll_interval(),
            min_profit_usd: default_min_profit(),
            gas_pricing: default_gas_pricing(),
            max_gas_price_gwei: default_max_gas_price(),
            priority_fee_gwei: default_priority_fee(),
            gas_limit: default_gas_limit(),
            estimated_gas_units: default_estimated_gas_units(),
            min_native_balance_eth: default_min_native_balance(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            receipt_poll_ms: default_receipt_poll(),
            price_cache_ttl_secs: default_price_ttl(),
            native_price_id: default_native_price_id(),
            fallback_native_price_usd: default_fallback_native_price(),
            simulate_before_submit: default_true(),
            tokens_file: None,
        }
    }
}

impl std::fmt::Debug for ResolverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("database_url", &redact_url(&self.database_url))
            .field("settlement_contract", &self.settlement_contract)
            .field("price_api_url", &self.price_api_url)
            .field("chain_id", &self.chain_id)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("min_profit_usd", &self.min_profit_usd)
            .field("gas_pricing", &self.gas_pricing)
            .field("max_gas_price_gwei", &self.max_gas_price_gwei)
            .finish_non_exhaustive()
    }
}

impl ResolverConfig {
    /// Load configuration: defaults, then `RESOLVER_CONFIG`, then the process
    /// environment. Validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::File {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::File {
            path: path_str,
            reason: e.to_string(),
        })
    }

    /// Overlay values from `lookup` (normally the process environment).
    ///
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("RPC_URL") {
            self.rpc_url = v;
        }
        if let Some(v) = get("PRIVATE_KEY") {
            self.private_key = v;
        }
        if let Some(v) = get("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = get("SETTLEMENT_CONTRACT") {
            self.settlement_contract = Some(parse("SETTLEMENT_CONTRACT", &v)?);
        }
        if let Some(v) = get("PRICE_API_URL") {
            self.price_api_url = v;
        }
        if let Some(v) = get("PRICE_API_TOKEN") {
            self.price_api_token = Some(v);
        }
        if let Some(v) = get("CHAIN_ID") {
            self.chain_id = parse("CHAIN_ID", &v)?;
        }
        if let Some(v) = get("POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse("POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("MIN_PROFIT_USD") {
            self.min_profit_usd = parse("MIN_PROFIT_USD", &v)?;
        }
        if let Some(v) = get("GAS_PRICING") {
            self.gas_pricing = v;
        }
        if let Some(v) = get("MAX_GAS_PRICE_GWEI") {
            self.max_gas_price_gwei = parse("MAX_GAS_PRICE_GWEI", &v)?;
        }
        if let Some(v) = get("PRIORITY_FEE_GWEI") {
            self.priority_fee_gwei = parse("PRIORITY_FEE_GWEI", &v)?;
        }
        if let Some(v) = get("GAS_LIMIT") {
            self.gas_limit = parse("GAS_LIMIT", &v)?;
        }
        if let Some(v) = get("ESTIMATED_GAS_UNITS") {
            self.estimated_gas_units = parse("ESTIMATED_GAS_UNITS", &v)?;
        }
        if let Some(v) = get("MIN_NATIVE_BALANCE_ETH") {
            self.min_native_balance_eth = parse("MIN_NATIVE_BALANCE_ETH", &v)?;
        }
        if let Some(v) = get("CONFIRMATION_TIMEOUT_SECS") {
            self.confirmation_timeout_secs = parse("CONFIRMATION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("RECEIPT_POLL_MS") {
            self.receipt_poll_ms = parse("RECEIPT_POLL_MS", &v)?;
        }
        if let Some(v) = get("PRICE_CACHE_TTL_SECS") {
            self.price_cache_ttl_secs = parse("PRICE_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = get("NATIVE_PRICE_ID") {
            self.native_price_id = v;
        }
        if let Some(v) = get("FALLBACK_NATIVE_PRICE_USD") {
            self.fallback_native_price_usd = parse("FALLBACK_NATIVE_PRICE_USD", &v)?;
        }
        if let Some(v) = get("SIMULATE_BEFORE_SUBMIT") {
            self.simulate_before_submit = parse_bool("SIMULATE_BEFORE_SUBMIT", &v)?;
        }
        if let Some(v) = get("TOKENS_FILE") {
            self.tokens_file = Some(v);
        }
        Ok(())
    }

    /// Check required settings and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_url.is_empty() {
            return Err(ConfigError::Missing("RPC_URL"));
        }
        if self.private_key.is_empty() {
            return Err(ConfigError::Missing("PRIVATE_KEY"));
        }
        if self.database_url.is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        match self.settlement_contract {
            None => return Err(ConfigError::Missing("SETTLEMENT_CONTRACT")),
            Some(addr) if addr == Address::ZERO => {
                return Err(invalid("SETTLEMENT_CONTRACT", "zero address"))
            }
            Some(_) => {}
        }
        if self.price_api_url.is_empty() {
            return Err(ConfigError::Missing("PRICE_API_URL"));
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("POLL_INTERVAL_SECS", "must be positive"));
        }
        if self.confirmation_timeout_secs == 0 {
            return Err(invalid("CONFIRMATION_TIMEOUT_SECS", "must be positive"));
        }
        if self.min_profit_usd.is_sign_negative() {
            return Err(invalid("MIN_PROFIT_USD", "must not be negative"));
        }
        if !(self.max_gas_price_gwei.is_finite() && self.max_gas_price_gwei > 0.0) {
            return Err(invalid("MAX_GAS_PRICE_GWEI", "must be positive"));
        }
        if !(self.priority_fee_gwei.is_finite() && self.priority_fee_gwei >= 0.0) {
            return Err(invalid("PRIORITY_FEE_GWEI", "must not be negative"));
        }
        if self.gas_limit == 0 {
            return Err(invalid("GAS_LIMIT", "must be positive"));
        }
        if decimal_to_wad(self.min_native_balance_eth).is_none() {
            return Err(invalid("MIN_NATIVE_BALANCE_ETH", "must be a non-negative amount"));
        }
        if decimal_to_wad(self.fallback_native_price_usd).is_none() {
            return Err(invalid("FALLBACK_NATIVE_PRICE_USD", "must be a non-negative amount"));
        }
        Ok(())
    }

    /// Contract address, `Address::ZERO` before validation.
    pub fn settlement_contract(&self) -> Address {
        self.settlement_contract.unwrap_or(Address::ZERO)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms.max(1))
    }

    pub fn price_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.price_cache_ttl_secs)
    }

    /// Static gas parameters for settlement transactions.
    pub fn gas_params(&self) -> GasParams {
        GasParams::from_gwei(
            &self.gas_pricing,
            self.gas_limit,
            self.max_gas_price_gwei,
            self.priority_fee_gwei,
        )
    }

    /// Operating reserve in wei.
    pub fn min_native_balance_wei(&self) -> U256 {
        decimal_to_wad(self.min_native_balance_eth).unwrap_or(U256::ZERO)
    }

    /// Whether orders are kept in process memory instead of Postgres.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url.starts_with("memory://")
    }

    /// Log the effective configuration. Secrets are never printed.
    pub fn log_config(&self) {
        info!(
            chain_id = self.chain_id,
            rpc_url = %self.rpc_url,
            database = %redact_url(&self.database_url),
            settlement_contract = %self.settlement_contract(),
            price_api_url = %self.price_api_url,
            "Resolver endpoints"
        );
        info!(
            poll_interval_secs = self.poll_interval_secs,
            min_profit_usd = %self.min_profit_usd,
            gas_pricing = %self.gas_pricing,
            max_gas_price_gwei = self.max_gas_price_gwei,
            priority_fee_gwei = self.priority_fee_gwei,
            gas_limit = self.gas_limit,
            estimated_gas_units = self.estimated_gas_units,
            min_native_balance_eth = %self.min_native_balance_eth,
            confirmation_timeout_secs = self.confirmation_timeout_secs,
            price_cache_ttl_secs = self.price_cache_ttl_secs,
            simulate_before_submit = self.simulate_before_submit,
            "Resolver parameters"
        );
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: format!("{value:?}: {e}"),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, &format!("{value:?} is not a boolean"))),
    }
}

/// Strip credentials from a connection string.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
