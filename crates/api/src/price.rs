//! Price source client.
//!
//! Fetches USD-equivalent prices from `GET {base_url}/price/{asset_id}` and
//! keeps them in a TTL cache keyed by the lower-cased asset identifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default cache TTL for price quotes.
pub const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(30);

/// Default HTTP request timeout for the price source.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A price observation in the common (USD) unit.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    /// Normalized (lower-cased) asset identifier
    pub asset_id: String,
    /// Price of one whole unit of the asset
    pub price: Decimal,
    /// When the quote was fetched from the source
    pub observed_at: DateTime<Utc>,
}

/// Anything that can answer "what is this asset worth right now".
///
/// Implementations never fail loudly: an unavailable price is `None`.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn get_price(&self, asset_id: &str) -> Option<PriceQuote>;
}

/// Reasons a fetch from the price source did not yield a quote.
#[derive(Debug, Error)]
pub enum PriceFetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Wire shape of the price source response.
#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: PriceValue,
}

/// The source documents a decimal string; plain JSON numbers are tolerated.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriceValue {
    Text(String),
    Number(serde_json::Number),
}

impl PriceValue {
    fn parse(&self) -> Result<Decimal, PriceFetchError> {
        let raw = match self {
            PriceValue::Text(s) => s.trim().to_string(),
            PriceValue::Number(n) => n.to_string(),
        };
        let price = Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map_err(|e| PriceFetchError::Malformed(format!("{raw:?}: {e}")))?;
        if price <= Decimal::ZERO {
            return Err(PriceFetchError::Malformed(format!("non-positive price {price}")));
        }
        Ok(price)
    }
}

#[derive(Clone)]
struct CachedQuote {
    quote: PriceQuote,
    fetched_at: Instant,
}

/// HTTP price oracle with TTL caching.
#[derive(Clone)]
pub struct PriceOracle {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    /// Quote cache: normalized asset id -> last successful quote
    cache: Arc<DashMap<String, CachedQuote>>,
    cache_ttl: Duration,
}

impl std::fmt::Debug for PriceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceOracle")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_token.is_some())
            .field("cache_size", &self.cache.len())
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl PriceOracle {
    /// Create a new oracle against `base_url` with the default TTL.
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
            cache: Arc::new(DashMap::new()),
            cache_ttl: DEFAULT_PRICE_TTL,
        }
    }

    /// Override the cache TTL.
    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Get current cache size.
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    fn normalize(asset_id: &str) -> String {
        asset_id.trim().to_lowercase()
    }

    /// Return the cached quote if it is younger than the TTL.
    fn fresh_cached(&self, key: &str) -> Option<PriceQuote> {
        let cached = self.cache.get(key)?;
        if cached.fetched_at.elapsed() < self.cache_ttl {
            debug!(
                asset = key,
                cache_age_ms = cached.fetched_at.elapsed().as_millis(),
                "Price cache hit"
            );
            Some(cached.quote.clone())
        } else {
            None
        }
    }

    /// Fetch a quote from the price source, bypassing the cache.
    pub async fn fetch_price(&self, asset_id: &str) -> Result<PriceQuote, PriceFetchError> {
        let key = Self::normalize(asset_id);
        let url = format!("{}/price/{}", self.base_url, key);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(PriceFetchError::Status(status.as_u16()));
        }

        let body: PriceResponse = response
            .json()
            .await
            .map_err(|e| PriceFetchError::Malformed(e.to_string()))?;
        let price = body.price.parse()?;

        Ok(PriceQuote {
            asset_id: key,
            price,
            observed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl PriceFeed for PriceOracle {
    #[instrument(skip(self))]
    async fn get_price(&self, asset_id: &str) -> Option<PriceQuote> {
        let key = Self::normalize(asset_id);

        if let Some(quote) = self.fresh_cached(&key) {
            return Some(quote);
        }

        match self.fetch_price(&key).await {
            Ok(quote) => {
                debug!(asset = %key, price = %quote.price, "Fetched fresh price");
                self.cache.insert(
                    key,
                    CachedQuote {
                        quote: quote.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Some(quote)
            }
            Err(e) => {
                // Stale or absent entries are left untouched.
                warn!(asset = %key, error = %e, "Price unavailable");
                None
            }
        }
    }
}
