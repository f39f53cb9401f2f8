//! Shared fixtures for unit tests.

use crate::config::{TokenConfig, TokenRegistry};
use crate::order::{Order, OrderHash, OrderStatus};
use alloy::primitives::{address, Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use resolver_api::{PriceFeed, PriceQuote};
use resolver_chain::{ChainClient, ChainError, Confirmation, FillEvent, GasParams};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
pub const WETH: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
pub const MAKER: Address = address!("00000000000000000000000000000000000000a1");
pub const SETTLEMENT_CONTRACT: Address = address!("111111125421ca6dc452d289314280a0f8842a65");

/// 100 USDC offered for 0.06 WETH, pending, expiring in an hour.
///
/// `n` seeds the hash and salt; higher `n` is created later.
pub fn order_fixture(n: u8) -> Order {
    let now = Utc::now();
    let created_at = now - Duration::hours(1) + Duration::seconds(n as i64);
    Order {
        hash: OrderHash(B256::repeat_byte(n)),
        maker: MAKER,
        receiver: None,
        maker_asset: USDC,
        taker_asset: WETH,
        making_amount: U256::from(100_000_000u64),
        taking_amount: U256::from(60_000_000_000_000_000u64),
        salt: U256::from(n),
        signature: Bytes::from(vec![0x11u8; 64]),
        traits: Bytes::new(),
        extension: Bytes::new(),
        expires_at: now + Duration::hours(1),
        status: OrderStatus::Pending,
        created_at,
        updated_at: created_at,
        last_settlement_at: None,
        settlement_tx: None,
    }
}

/// USDC (6 decimals, "usdc") and WETH (18 decimals, "eth").
pub fn token_registry() -> TokenRegistry {
    TokenRegistry::new([
        TokenConfig {
            symbol: "USDC".into(),
            address: USDC,
            decimals: 6,
            price_id: None,
        },
        TokenConfig {
            symbol: "WETH".into(),
            address: WETH,
            decimals: 18,
            price_id: Some("eth".into()),
        },
    ])
}

/// Fixed price table.
#[derive(Debug, Clone, Default)]
pub struct StaticPrices {
    prices: HashMap<String, Decimal>,
}

impl StaticPrices {
    pub fn new(prices: &[(&str, i64)]) -> Self {
        Self {
            prices: prices
                .iter()
                .map(|(id, price)| (id.to_string(), Decimal::from(*price)))
                .collect(),
        }
    }
}

#[async_trait]
impl PriceFeed for StaticPrices {
    async fn get_price(&self, asset_id: &str) -> Option<PriceQuote> {
        let id = asset_id.to_lowercase();
        self.prices.get(&id).map(|price| PriceQuote {
            asset_id: id.clone(),
            price: *price,
            observed_at: Utc::now(),
        })
    }
}

/// Scripted chain: records submissions and mines them on demand.
pub struct MockChain {
    balance: Mutex<U256>,
    call_error: Mutex<Option<ChainError>>,
    auto_mine: AtomicBool,
    auto_success: AtomicBool,
    fills: Mutex<Vec<FillEvent>>,
    submissions: Mutex<Vec<(Address, Bytes)>>,
    pending: Mutex<Vec<B256>>,
    receipts: Mutex<HashMap<B256, Confirmation>>,
    next_tx: AtomicU64,
}

impl MockChain {
    /// Every submission is mined successfully right away.
    pub fn mining() -> Self {
        Self {
            balance: Mutex::new(U256::from(1_000_000_000_000_000_000u64)),
            call_error: Mutex::new(None),
            auto_mine: AtomicBool::new(true),
            auto_success: AtomicBool::new(true),
            fills: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            next_tx: AtomicU64::new(1),
        }
    }

    /// Submissions stay unmined until [`MockChain::mine_pending`].
    pub fn never_mining() -> Self {
        let chain = Self::mining();
        chain.auto_mine.store(false, Ordering::SeqCst);
        chain
    }

    /// Submissions are mined with a failed status.
    pub fn reverting(self) -> Self {
        self.auto_success.store(false, Ordering::SeqCst);
        self
    }

    pub fn with_balance(self, balance: U256) -> Self {
        *self.balance.lock() = balance;
        self
    }

    /// Successful receipts carry an `OrderFilled` log from `emitter`.
    pub fn with_fill(self, emitter: Address, order: OrderHash, remaining: U256) -> Self {
        self.fills.lock().push(FillEvent {
            emitter,
            order_hash: order.0,
            remaining,
        });
        self
    }

    pub fn with_call_error(self, error: ChainError) -> Self {
        *self.call_error.lock() = Some(error);
        self
    }

    pub fn set_auto_mine(&self, enabled: bool) {
        self.auto_mine.store(enabled, Ordering::SeqCst);
        self.auto_success.store(true, Ordering::SeqCst);
    }

    /// Mine every pending submission with the given status.
    pub fn mine_pending(&self, success: bool) {
        let pending: Vec<B256> = self.pending.lock().drain(..).collect();
        for tx_hash in pending {
            let confirmation = self.confirmation(tx_hash, success);
            self.receipts.lock().insert(tx_hash, confirmation);
        }
    }

    pub fn submissions(&self) -> Vec<(Address, Bytes)> {
        self.submissions.lock().clone()
    }

    fn confirmation(&self, tx_hash: B256, success: bool) -> Confirmation {
        Confirmation {
            tx_hash,
            success,
            block_number: Some(100),
            gas_used: 150_000,
            fills: if success { self.fills.lock().clone() } else { Vec::new() },
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn wallet_address(&self) -> Address {
        address!("00000000000000000000000000000000000000b0")
    }

    async fn get_balance(&self, _address: Address) -> Result<U256, ChainError> {
        Ok(*self.balance.lock())
    }

    async fn call(&self, _to: Address, _calldata: Bytes) -> Result<Bytes, ChainError> {
        match self.call_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(Bytes::new()),
        }
    }

    async fn submit(&self, to: Address, calldata: Bytes, _gas: &GasParams) -> Result<B256, ChainError> {
        self.submissions.lock().push((to, calldata));
        let tx_hash = B256::from(U256::from(self.next_tx.fetch_add(1, Ordering::SeqCst)).to_be_bytes::<32>());
        if self.auto_mine.load(Ordering::SeqCst) {
            let confirmation = self.confirmation(tx_hash, self.auto_success.load(Ordering::SeqCst));
            self.receipts.lock().insert(tx_hash, confirmation);
        } else {
            self.pending.lock().push(tx_hash);
        }
        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<Confirmation>, ChainError> {
        Ok(self.receipts.lock().get(&tx_hash).cloned())
    }

    fn receipt_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(2)
    }
}
