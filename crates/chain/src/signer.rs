//! Transaction signer and sender for settlements.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! The resolver is the only writer for its wallet and submits sequentially,
//! so the nonce is tracked locally and only re-read from chain after a failed
//! submission.

use crate::error::ChainError;
use crate::gas::GasParams;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Cached nonce manager for transaction submission.
pub struct NonceManager {
    /// Current nonce (atomically incremented)
    current: AtomicU64,
}

impl NonceManager {
    /// Create new nonce manager with initial value from chain.
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Get next nonce and increment counter.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    /// Get current nonce without incrementing.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Reset nonce to chain value (use after a failed submission).
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Signs and submits settlement transactions from the operating wallet.
pub struct TransactionSender {
    /// RPC URL for sending transactions
    rpc_url: String,
    /// Signer wallet
    wallet: EthereumWallet,
    /// Signer address
    pub address: Address,
    /// Chain ID
    chain_id: u64,
    /// Cached nonce manager
    nonce_manager: NonceManager,
}

impl TransactionSender {
    /// Create a new transaction sender from a hex private key (with or without `0x`).
    ///
    /// Fetches the wallet's pending nonce once; later submissions use the local counter.
    pub async fn new(private_key: &str, rpc_url: &str, chain_id: u64) -> Result<Self> {
        let key_str = private_key.trim().trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str.parse().context("invalid private key")?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new().on_http(rpc_url.parse().context("invalid RPC URL")?);
        let initial_nonce = provider
            .get_transaction_count(address)
            .await
            .context("failed to fetch wallet nonce")?;

        info!(
            address = %address,
            chain_id = chain_id,
            initial_nonce = initial_nonce,
            "Transaction sender initialized"
        );

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            wallet,
            address,
            chain_id,
            nonce_manager: NonceManager::new(initial_nonce),
        })
    }

    /// Sign and broadcast a transaction. Does not wait for it to be mined.
    pub async fn submit(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
        gas: &GasParams,
    ) -> Result<B256, ChainError> {
        let submit_start = Instant::now();
        let nonce = self.nonce_manager.next();

        let mut tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_input(calldata)
            .with_value(value)
            .with_nonce(nonce)
            .with_chain_id(self.chain_id);
        gas.apply(&mut tx);

        info!(
            to = %to,
            nonce = nonce,
            gas_limit = gas.gas_limit(),
            gas_model = gas.model_name(),
            gas_price_gwei = gas.effective_gas_price() / crate::gas::GWEI,
            "Sending transaction"
        );

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Build(format!("invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(url);

        match provider.send_transaction(tx).await {
            Ok(pending) => {
                let tx_hash = *pending.tx_hash();
                info!(
                    tx_hash = %tx_hash,
                    submit_ms = submit_start.elapsed().as_millis(),
                    "Transaction submitted"
                );
                Ok(tx_hash)
            }
            Err(e) => {
                // The nonce was not consumed on chain; re-read it.
                warn!(nonce = nonce, error = %e, "Submission failed, syncing nonce");
                self.sync_nonce().await;
                Err(crate::error::map_rpc_error(e))
            }
        }
    }

    /// Sync nonce from chain (call on error).
    pub async fn sync_nonce(&self) {
        let url = match self.rpc_url.parse() {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot sync nonce: invalid RPC URL");
                return;
            }
        };
        let provider = ProviderBuilder::new().on_http(url);
        match provider.get_transaction_count(self.address).await {
            Ok(chain_nonce) => {
                let local = self.nonce_manager.current();
                self.nonce_manager.reset(chain_nonce);
                debug!(local = local, nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => {
                warn!(error = %e, "Failed to sync nonce from chain");
            }
        }
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .finish_non_exhaustive()
    }
}
