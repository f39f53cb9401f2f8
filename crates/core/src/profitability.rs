//! Profitability evaluation.
//!
//! Sign convention: settling an order delivers `taking_amount` of the taker
//! asset to the maker side and releases `making_amount` of the maker asset,
//! valued from the resolver's book as
//!
//! ```text
//! gross = value(taking) - value(making)
//! net   = gross - gas_units * gas_price * native_price
//! ```
//!
//! All values are WAD (18-decimal) USD integers.

use crate::config::{ResolverConfig, TokenRegistry};
use crate::order::Order;
use crate::u256_math::{decimal_to_wad, format_wad, gas_cost_wad, signed_sub, value_wad};
use alloy::primitives::{I256, U256};
use resolver_api::PriceFeed;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const REASON_ZERO_AMOUNT: &str = "zero amount";
pub const REASON_PRICES_UNAVAILABLE: &str = "prices unavailable";
pub const REASON_CALCULATION_ERROR: &str = "calculation error";
pub const REASON_BELOW_THRESHOLD: &str = "below minimum profit";

/// Valuation of one order, all fields in WAD USD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfitBreakdown {
    pub making_value: U256,
    pub taking_value: U256,
    pub gross_profit: I256,
    pub gas_cost: U256,
}

/// Execute/skip decision for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitabilityResult {
    pub is_profitable: bool,
    /// Signed WAD USD; zero when the evaluation could not complete
    pub estimated_net_profit: I256,
    pub reason: Option<&'static str>,
    pub breakdown: Option<ProfitBreakdown>,
}

impl ProfitabilityResult {
    fn rejected(reason: &'static str) -> Self {
        Self {
            is_profitable: false,
            estimated_net_profit: I256::ZERO,
            reason: Some(reason),
            breakdown: None,
        }
    }
}

impl fmt::Display for ProfitabilityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "profitable={} net=${}",
            self.is_profitable,
            format_wad(self.estimated_net_profit)
        )?;
        if let Some(reason) = self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// Fixed inputs of the profit model.
#[derive(Debug, Clone)]
pub struct ProfitabilityParams {
    /// Minimum net profit, WAD USD
    pub min_profit: U256,
    pub gas_units: u64,
    /// Static gas price, wei
    pub gas_price_wei: u128,
    pub native_price_id: String,
    /// Native token price when the price source has none, WAD USD
    pub fallback_native_price: U256,
}

impl ProfitabilityParams {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            min_profit: decimal_to_wad(config.min_profit_usd).unwrap_or(U256::ZERO),
            gas_units: config.estimated_gas_units,
            gas_price_wei: config.gas_params().effective_gas_price(),
            native_price_id: config.native_price_id.clone(),
            fallback_native_price: decimal_to_wad(config.fallback_native_price_usd)
                .unwrap_or(U256::ZERO),
        }
    }
}

pub struct ProfitabilityEvaluator {
    prices: Arc<dyn PriceFeed>,
    tokens: Arc<TokenRegistry>,
    params: ProfitabilityParams,
}

impl ProfitabilityEvaluator {
    pub fn new(
        prices: Arc<dyn PriceFeed>,
        tokens: Arc<TokenRegistry>,
        params: ProfitabilityParams,
    ) -> Self {
        Self {
            prices,
            tokens,
            params,
        }
    }

    /// Decide whether settling `order` clears the profit floor.
    ///
    /// Never fails: missing prices and arithmetic overflow come back as
    /// non-profitable results with a reason.
    #[instrument(skip(self, order), fields(order = %order.hash))]
    pub async fn evaluate(&self, order: &Order) -> ProfitabilityResult {
        if order.making_amount.is_zero() || order.taking_amount.is_zero() {
            debug!("Zero amount, skipping");
            return ProfitabilityResult::rejected(REASON_ZERO_AMOUNT);
        }

        let maker_token = self.tokens.resolve(&order.maker_asset);
        let taker_token = self.tokens.resolve(&order.taker_asset);

        let (Some(maker_quote), Some(taker_quote)) = (
            self.prices.get_price(&maker_token.price_id).await,
            self.prices.get_price(&taker_token.price_id).await,
        ) else {
            debug!(
                maker_asset = %maker_token.price_id,
                taker_asset = %taker_token.price_id,
                "Price unavailable"
            );
            return ProfitabilityResult::rejected(REASON_PRICES_UNAVAILABLE);
        };

        let native_price = self.native_price().await;

        let breakdown = (|| {
            let making_value = value_wad(
                order.making_amount,
                decimal_to_wad(maker_quote.price)?,
                maker_token.decimals,
            )?;
            let taking_value = value_wad(
                order.taking_amount,
                decimal_to_wad(taker_quote.price)?,
                taker_token.decimals,
            )?;
            Some(ProfitBreakdown {
                making_value,
                taking_value,
                gross_profit: signed_sub(taking_value, making_value)?,
                gas_cost: gas_cost_wad(self.params.gas_units, self.params.gas_price_wei, native_price)?,
            })
        })();

        let Some(breakdown) = breakdown else {
            warn!("Profit calculation overflowed");
            return ProfitabilityResult::rejected(REASON_CALCULATION_ERROR);
        };

        let (Some(net), Ok(min_profit)) = (
            I256::try_from(breakdown.gas_cost)
                .ok()
                .and_then(|gas| breakdown.gross_profit.checked_sub(gas)),
            I256::try_from(self.params.min_profit),
        ) else {
            warn!("Profit calculation overflowed");
            return ProfitabilityResult::rejected(REASON_CALCULATION_ERROR);
        };

        let is_profitable = net >= min_profit;
        debug!(
            making_usd = %usd(breakdown.making_value),
            taking_usd = %usd(breakdown.taking_value),
            gross_usd = %format_wad(breakdown.gross_profit),
            gas_usd = %usd(breakdown.gas_cost),
            net_usd = %format_wad(net),
            profitable = is_profitable,
            "Order evaluated"
        );

        ProfitabilityResult {
            is_profitable,
            estimated_net_profit: net,
            reason: (!is_profitable).then_some(REASON_BELOW_THRESHOLD),
            breakdown: Some(breakdown),
        }
    }

    /// Live native price, or the configured fallback.
    async fn native_price(&self) -> U256 {
        match self.prices.get_price(&self.params.native_price_id).await {
            Some(quote) => match decimal_to_wad(quote.price) {
                Some(price) => price,
                None => self.params.fallback_native_price,
            },
            None => {
                debug!(
                    asset = %self.params.native_price_id,
                    "Native price unavailable, using fallback"
                );
                self.params.fallback_native_price
            }
        }
    }
}

fn usd(value: U256) -> String {
    signed_sub(value, U256::ZERO)
        .map(format_wad)
        .unwrap_or_else(|| value.to_string())
}
