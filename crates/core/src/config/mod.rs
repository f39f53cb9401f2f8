//! Resolver configuration.
//!
//! - Runtime parameters from defaults, an optional TOML file and the environment
//! - Token metadata registry (decimals and price source ids)

mod resolver;
mod tokens;

pub use resolver::{ConfigError, ResolverConfig, CONFIG_FILE_ENV};
pub use tokens::{TokenConfig, TokenInfo, TokenRegistry, TokensFile, DEFAULT_DECIMALS};
