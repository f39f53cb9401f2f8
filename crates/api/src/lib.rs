//! Resolver API clients for external services.
//!
//! This crate provides HTTP clients for:
//! - Price source: USD-equivalent asset prices with a short-lived cache

mod price;

pub use price::{PriceFeed, PriceFetchError, PriceOracle, PriceQuote, DEFAULT_PRICE_TTL};
