//! Resolver core logic.
//!
//! This crate provides the order-settlement pipeline:
//! - Order model and status state machine
//! - Order store access with compare-and-swap status transitions
//! - Expiry sweeping
//! - Profitability evaluation in WAD fixed point
//! - Settlement execution against the limit-order protocol
//! - The resolver loop tying them together

pub mod config;
mod order;
mod profitability;
mod resolver;
mod settlement;
pub mod store;
mod sweeper;
pub mod u256_math;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, ResolverConfig, TokenConfig, TokenInfo, TokenRegistry};
pub use order::{Order, OrderHash, OrderStatus, ParseError, StatusUpdate};
pub use profitability::{
    ProfitBreakdown, ProfitabilityEvaluator, ProfitabilityParams, ProfitabilityResult,
    REASON_BELOW_THRESHOLD, REASON_CALCULATION_ERROR, REASON_PRICES_UNAVAILABLE,
    REASON_ZERO_AMOUNT,
};
pub use resolver::{Resolver, TickReport};
pub use settlement::{SettlementErrorKind, SettlementExecutor, SettlementOutcome, SettlementParams};
pub use store::{MemoryOrderStore, OrderStore, PgOrderStore, StoreError};
pub use sweeper::ExpirySweeper;
