//! Chain client abstraction and its Alloy-backed implementation.

use crate::error::{map_rpc_error, ChainError};
use crate::gas::GasParams;
use crate::limit_order::{fill_events, remaining_after_fill, FillEvent};
use crate::signer::TransactionSender;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default interval between receipt polls.
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Mined transaction outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: B256,
    /// Receipt status: `false` means the transaction reverted.
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    /// `OrderFilled` events in the receipt, unfiltered.
    pub fills: Vec<FillEvent>,
}

impl Confirmation {
    /// Remaining making amount reported by `contract` for `order_hash`.
    pub fn remaining_making(&self, contract: Address, order_hash: B256) -> Option<U256> {
        remaining_after_fill(&self.fills, contract, order_hash)
    }
}

/// Operations the resolver needs from the chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the operating wallet.
    fn wallet_address(&self) -> Address;

    /// Native currency balance in wei.
    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Read-only `eth_call` from the operating wallet. Reverts surface as
    /// [`ChainError::Reverted`].
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError>;

    /// Sign and broadcast a transaction; returns its hash.
    async fn submit(&self, to: Address, calldata: Bytes, gas: &GasParams)
        -> Result<B256, ChainError>;

    /// Receipt lookup; `None` while the transaction is not yet mined.
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<Confirmation>, ChainError>;

    /// Interval between receipt polls in [`ChainClient::wait_for_confirmation`].
    fn receipt_poll_interval(&self) -> Duration {
        DEFAULT_RECEIPT_POLL_INTERVAL
    }

    /// Poll for a receipt until it appears or `timeout` elapses.
    ///
    /// Transient lookup errors are logged and polling continues; only the
    /// deadline ends the wait without a receipt.
    async fn wait_for_confirmation(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Confirmation, ChainError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.transaction_receipt(tx_hash).await {
                Ok(Some(confirmation)) => return Ok(confirmation),
                Ok(None) => {}
                Err(e) => warn!(tx_hash = %tx_hash, error = %e, "Receipt lookup failed"),
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(ChainError::Timeout(timeout));
            }
            tokio::time::sleep(self.receipt_poll_interval().min(deadline - now)).await;
        }
    }
}

/// [`ChainClient`] over an HTTP JSON-RPC endpoint.
pub struct AlloyChainClient {
    rpc_url: String,
    sender: Arc<TransactionSender>,
    poll_interval: Duration,
}

impl AlloyChainClient {
    pub fn new(rpc_url: impl Into<String>, sender: Arc<TransactionSender>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            sender,
            poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        }
    }

    /// Set the receipt poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn read_provider(&self) -> Result<impl Provider, ChainError> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Build(format!("invalid RPC URL: {e}")))?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    /// Verify the endpoint is reachable.
    pub async fn health_check(&self) -> Result<u64, ChainError> {
        let block = self
            .read_provider()?
            .get_block_number()
            .await
            .map_err(map_rpc_error)?;
        info!(block = block, "Chain connection verified");
        Ok(block)
    }
}

impl std::fmt::Debug for AlloyChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyChainClient")
            .field("rpc_url", &self.rpc_url)
            .field("wallet", &self.sender.address)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

fn to_confirmation(receipt: &TransactionReceipt) -> Confirmation {
    Confirmation {
        tx_hash: receipt.transaction_hash,
        success: receipt.status(),
        block_number: receipt.block_number,
        gas_used: receipt.gas_used as u64,
        fills: fill_events(receipt.inner.logs()),
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn wallet_address(&self) -> Address {
        self.sender.address
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.read_provider()?
            .get_balance(address)
            .await
            .map_err(map_rpc_error)
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(self.sender.address)
            .with_to(to)
            .with_input(calldata);

        let result: Result<Bytes, _> = self
            .read_provider()?
            .raw_request("eth_call".into(), (tx, "latest"))
            .await;

        result.map_err(map_rpc_error)
    }

    async fn submit(
        &self,
        to: Address,
        calldata: Bytes,
        gas: &GasParams,
    ) -> Result<B256, ChainError> {
        self.sender.submit(to, calldata, U256::ZERO, gas).await
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<Confirmation>, ChainError> {
        let receipt = self
            .read_provider()?
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(map_rpc_error)?;

        let confirmation = receipt.as_ref().map(to_confirmation);
        if let Some(c) = &confirmation {
            debug!(
                tx_hash = %tx_hash,
                success = c.success,
                block = c.block_number.unwrap_or(0),
                gas_used = c.gas_used,
                "Receipt found"
            );
        }
        Ok(confirmation)
    }

    fn receipt_poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
