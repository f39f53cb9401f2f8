//! Token metadata loading from TOML files.
//!
//! ```toml
//! [[tokens]]
//! symbol = "USDC"
//! address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
//! decimals = 6
//! price_id = "usdc"
//! ```

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use super::ConfigError;

/// Decimals assumed for assets missing from the registry.
pub const DEFAULT_DECIMALS: u8 = 18;

/// Token file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokensFile {
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

/// Individual token entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Token symbol (e.g. "WETH", "USDC")
    pub symbol: String,
    /// Token contract address
    pub address: Address,
    /// Token decimals
    pub decimals: u8,
    /// Identifier used with the price source; defaults to the lower-cased symbol
    #[serde(default)]
    pub price_id: Option<String>,
}

impl TokenConfig {
    pub fn price_id(&self) -> String {
        self.price_id
            .clone()
            .unwrap_or_else(|| self.symbol.to_lowercase())
    }
}

/// What the profitability evaluator needs to value an amount of an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub decimals: u8,
    pub price_id: String,
}

/// Asset address -> token metadata lookup.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    by_address: HashMap<Address, TokenConfig>,
}

impl TokenRegistry {
    pub fn new(tokens: impl IntoIterator<Item = TokenConfig>) -> Self {
        Self {
            by_address: tokens.into_iter().map(|t| (t.address, t)).collect(),
        }
    }

    /// Load from a `[[tokens]]` TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::File {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;
        let registry = Self::from_toml(&content).map_err(|e| ConfigError::File {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;
        info!(path = %path_str, tokens = registry.len(), "Token registry loaded");
        Ok(registry)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let file: TokensFile = toml::from_str(content)?;
        Ok(Self::new(file.tokens))
    }

    pub fn get(&self, address: &Address) -> Option<&TokenConfig> {
        self.by_address.get(address)
    }

    /// Metadata for `address`, falling back to 18 decimals and the
    /// lower-cased address as price id for unknown assets.
    pub fn resolve(&self, address: &Address) -> TokenInfo {
        match self.by_address.get(address) {
            Some(token) => TokenInfo {
                decimals: token.decimals,
                price_id: token.price_id(),
            },
            None => {
                let price_id = format!("{address:#x}");
                debug!(asset = %price_id, "Unknown token, assuming 18 decimals");
                TokenInfo {
                    decimals: DEFAULT_DECIMALS,
                    price_id,
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
