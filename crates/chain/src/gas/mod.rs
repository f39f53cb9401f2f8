//! Static gas parameters for settlement transactions.
//!
//! Settlement gas is configured, never estimated live, so the worst-case cost
//! of a transaction is known before it is sent.
//!
//! # Example
//!
//! ```rust,ignore
//! use resolver_chain::gas::GasParams;
//!
//! // EIP-1559 chain: 300k gas limit, 50 gwei max fee, 2 gwei tip
//! let gas = GasParams::from_gwei("eip1559", 300_000, 50.0, 2.0);
//! assert_eq!(gas.effective_gas_price(), 50_000_000_000);
//! ```

use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;

/// Wei per gwei.
pub const GWEI: u128 = 1_000_000_000;

/// Gas parameters attached to every settlement transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasParams {
    /// Legacy gas pricing (pre-EIP-1559).
    Legacy {
        gas_limit: u64,
        /// Gas price in wei.
        gas_price: u128,
    },
    /// EIP-1559 gas pricing.
    Eip1559 {
        gas_limit: u64,
        /// Maximum fee per gas in wei.
        max_fee_per_gas: u128,
        /// Maximum priority fee per gas in wei.
        max_priority_fee_per_gas: u128,
    },
}

impl GasParams {
    /// Build gas parameters from configuration values.
    ///
    /// `pricing_model` is "legacy" or "eip1559" (case-insensitive); anything
    /// else falls back to EIP-1559. The priority fee is capped at the max fee.
    pub fn from_gwei(
        pricing_model: &str,
        gas_limit: u64,
        max_gas_price_gwei: f64,
        priority_fee_gwei: f64,
    ) -> Self {
        let max_fee = gwei_to_wei(max_gas_price_gwei);
        match pricing_model.to_lowercase().as_str() {
            "legacy" => GasParams::Legacy {
                gas_limit,
                gas_price: max_fee,
            },
            _ => GasParams::Eip1559 {
                gas_limit,
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: gwei_to_wei(priority_fee_gwei).min(max_fee),
            },
        }
    }

    /// Gas limit for the transaction.
    pub fn gas_limit(&self) -> u64 {
        match self {
            GasParams::Legacy { gas_limit, .. } | GasParams::Eip1559 { gas_limit, .. } => {
                *gas_limit
            }
        }
    }

    /// Get the effective gas price for estimation purposes.
    pub fn effective_gas_price(&self) -> u128 {
        match self {
            GasParams::Legacy { gas_price, .. } => *gas_price,
            GasParams::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }

    /// Get the pricing model name for logging.
    pub fn model_name(&self) -> &'static str {
        match self {
            GasParams::Legacy { .. } => "Legacy",
            GasParams::Eip1559 { .. } => "EIP-1559",
        }
    }

    /// Apply these parameters to a transaction request in place.
    pub fn apply(&self, tx: &mut TransactionRequest) {
        tx.set_gas_limit(self.gas_limit());
        match self {
            GasParams::Legacy { gas_price, .. } => {
                tx.set_gas_price(*gas_price);
            }
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => {
                tx.set_max_fee_per_gas(*max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(*max_priority_fee_per_gas);
            }
        }
    }
}

fn gwei_to_wei(gwei: f64) -> u128 {
    if !gwei.is_finite() || gwei <= 0.0 {
        return 0;
    }
    (gwei * GWEI as f64).round() as u128
}
