//! Resolver chain interaction layer.
//!
//! This crate provides:
//! - The [`ChainClient`] seam used by the settlement executor
//! - An Alloy HTTP implementation of it
//! - Transaction signing and sending with a local nonce counter
//! - Static gas parameters (Legacy + EIP-1559)
//! - Limit-order protocol bindings and call reconstruction

mod client;
mod error;
pub mod gas;
pub mod limit_order;
mod signer;

pub use client::{AlloyChainClient, ChainClient, Confirmation, DEFAULT_RECEIPT_POLL_INTERVAL};
pub use error::ChainError;
pub use gas::GasParams;
pub use limit_order::{reconstruct, FillCall, FillEvent, OrderPayload, ReconstructionError};
pub use signer::{NonceManager, TransactionSender};
