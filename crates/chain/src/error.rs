//! Chain-layer error type.

use alloy::transports::{RpcError, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the chain client.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Transport or node-side failure unrelated to contract execution.
    #[error("rpc error: {0}")]
    Transport(String),
    /// The node reported that contract execution reverted.
    #[error("execution reverted: {0}")]
    Reverted(String),
    /// No receipt within the allotted time.
    #[error("no confirmation after {0:?}")]
    Timeout(Duration),
    /// The transaction could not be built or signed.
    #[error("transaction build failed: {0}")]
    Build(String),
}

/// JSON-RPC code geth-style nodes use for reverted `eth_call`s.
const EXECUTION_REVERTED_CODE: i64 = 3;

/// Classify a transport error, separating contract reverts from everything else.
pub(crate) fn map_rpc_error(err: TransportError) -> ChainError {
    match err {
        RpcError::ErrorResp(payload) => {
            let message = payload.message.to_string();
            if payload.code == EXECUTION_REVERTED_CODE
                || message.to_lowercase().contains("revert")
            {
                ChainError::Reverted(message)
            } else {
                ChainError::Transport(format!("{} (code {})", message, payload.code))
            }
        }
        other => ChainError::Transport(other.to_string()),
    }
}
