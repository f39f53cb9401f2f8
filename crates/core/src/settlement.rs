//! Settlement execution.
//!
//! Turns a persisted order into a `fillOrderArgs` transaction, submits it,
//! waits for the receipt and records the result in the order store.
//!
//! A transaction that outlives the confirmation timeout is remembered per
//! order. [`SettlementExecutor::reconcile_in_flight`] follows those receipts
//! up every tick, and a new attempt for the same order looks the receipt up
//! instead of sending a second transaction.

use crate::config::ResolverConfig;
use crate::order::{Order, OrderHash, OrderStatus, StatusUpdate};
use crate::store::OrderStore;
use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use dashmap::DashMap;
use resolver_chain::{reconstruct, ChainClient, ChainError, Confirmation, GasParams};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// In-flight records older than this many confirmation timeouts are dropped.
const IN_FLIGHT_EXPIRY_FACTOR: u32 = 10;

/// Why a settlement did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementErrorKind {
    InsufficientBalance,
    MalformedOrder,
    InvalidOnChain,
    TransactionFailed,
    ConfirmationTimeout,
    Unknown,
}

impl SettlementErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementErrorKind::InsufficientBalance => "insufficientBalance",
            SettlementErrorKind::MalformedOrder => "malformedOrder",
            SettlementErrorKind::InvalidOnChain => "invalidOnChain",
            SettlementErrorKind::TransactionFailed => "transactionFailed",
            SettlementErrorKind::ConfirmationTimeout => "confirmationTimeout",
            SettlementErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SettlementErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub success: bool,
    pub transaction_id: Option<B256>,
    pub error_kind: Option<SettlementErrorKind>,
    /// Status the order was moved to, when the store write landed
    pub recorded_status: Option<OrderStatus>,
}

impl SettlementOutcome {
    fn settled(tx_hash: B256, recorded_status: Option<OrderStatus>) -> Self {
        Self {
            success: true,
            transaction_id: Some(tx_hash),
            error_kind: None,
            recorded_status,
        }
    }

    fn failed(kind: SettlementErrorKind, tx_hash: Option<B256>) -> Self {
        Self {
            success: false,
            transaction_id: tx_hash,
            error_kind: Some(kind),
            recorded_status: None,
        }
    }
}

/// Static settlement parameters.
#[derive(Debug, Clone)]
pub struct SettlementParams {
    pub contract: Address,
    pub gas: GasParams,
    /// Native balance (wei) the wallet must hold before anything is sent
    pub min_native_balance: U256,
    pub confirmation_timeout: Duration,
    pub simulate_before_submit: bool,
}

impl SettlementParams {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            contract: config.settlement_contract(),
            gas: config.gas_params(),
            min_native_balance: config.min_native_balance_wei(),
            confirmation_timeout: config.confirmation_timeout(),
            simulate_before_submit: config.simulate_before_submit,
        }
    }
}

/// A submitted transaction with no receipt yet.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    tx_hash: B256,
    submitted_at: Instant,
}

pub struct SettlementExecutor {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn OrderStore>,
    params: SettlementParams,
    in_flight: DashMap<OrderHash, InFlight>,
}

impl SettlementExecutor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn OrderStore>,
        params: SettlementParams,
    ) -> Self {
        Self {
            chain,
            store,
            params,
            in_flight: DashMap::new(),
        }
    }

    /// Orders with a submitted but unconfirmed transaction.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Follow up every tracked transaction, whether or not its order is
    /// still worth settling.
    ///
    /// Confirmed fills are recorded, reverted transactions and orders that
    /// left an active status are forgotten. Returns the number of fills
    /// recorded.
    pub async fn reconcile_in_flight(&self) -> usize {
        let tracked: Vec<(OrderHash, InFlight)> =
            self.in_flight.iter().map(|e| (*e.key(), *e.value())).collect();
        if tracked.is_empty() {
            return 0;
        }
        debug!(count = tracked.len(), "Reconciling in-flight settlements");

        let max_age = self.params.confirmation_timeout * IN_FLIGHT_EXPIRY_FACTOR;
        let mut recorded = 0;
        for (hash, entry) in tracked {
            let order = match self.store.get(&hash).await {
                Ok(Some(order)) => order,
                Ok(None) => {
                    warn!(order = %hash, tx_hash = %entry.tx_hash, "Tracked order no longer in store");
                    self.in_flight.remove(&hash);
                    continue;
                }
                Err(e) => {
                    warn!(order = %hash, error = %e, "Cannot load tracked order");
                    continue;
                }
            };

            match self.chain.transaction_receipt(entry.tx_hash).await {
                Ok(Some(confirmation)) if confirmation.success => {
                    info!(order = %hash, tx_hash = %entry.tx_hash, "Earlier settlement confirmed");
                    self.in_flight.remove(&hash);
                    if self.record(&order, &confirmation).await.recorded_status.is_some() {
                        recorded += 1;
                    }
                }
                Ok(Some(_)) => {
                    info!(order = %hash, tx_hash = %entry.tx_hash, "Earlier settlement reverted");
                    self.in_flight.remove(&hash);
                }
                Ok(None) if !order.status.is_active() => {
                    debug!(order = %hash, status = %order.status, "Order left active status, untracking");
                    self.in_flight.remove(&hash);
                }
                Ok(None) if entry.submitted_at.elapsed() > max_age => {
                    warn!(
                        order = %hash,
                        tx_hash = %entry.tx_hash,
                        age_secs = entry.submitted_at.elapsed().as_secs(),
                        "Dropping stale in-flight settlement"
                    );
                    self.in_flight.remove(&hash);
                }
                Ok(None) => {}
                Err(e) => warn!(order = %hash, tx_hash = %entry.tx_hash, error = %e, "Receipt lookup failed"),
            }
        }
        recorded
    }

    /// Settle one order on chain.
    ///
    /// Every path ends in an outcome; nothing is raised to the caller. The
    /// store is only written after a successful receipt.
    #[instrument(skip(self, order), fields(order = %order.hash))]
    pub async fn settle(&self, order: &Order) -> SettlementOutcome {
        if let Some(outcome) = self.resume_in_flight(order).await {
            return outcome;
        }

        // 1. Operating reserve
        let wallet = self.chain.wallet_address();
        match self.chain.get_balance(wallet).await {
            Ok(balance) if balance < self.params.min_native_balance => {
                warn!(
                    wallet = %wallet,
                    balance_wei = %balance,
                    reserve_wei = %self.params.min_native_balance,
                    "Wallet balance below reserve"
                );
                return SettlementOutcome::failed(SettlementErrorKind::InsufficientBalance, None);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(wallet = %wallet, error = %e, "Balance check failed");
                return SettlementOutcome::failed(SettlementErrorKind::Unknown, None);
            }
        }

        // 2. Reconstruction
        let call = match reconstruct(&order.payload()) {
            Ok(call) => call,
            Err(e) => {
                warn!(error = %e, "Order cannot be reconstructed");
                return SettlementOutcome::failed(SettlementErrorKind::MalformedOrder, None);
            }
        };
        let calldata = call.calldata();

        // 3. Optional simulation. Only a revert blocks submission.
        if self.params.simulate_before_submit {
            match self.chain.call(self.params.contract, calldata.clone()).await {
                Ok(_) => debug!("Simulation passed"),
                Err(ChainError::Reverted(reason)) => {
                    info!(reason = %reason, "Fill would revert, not submitting");
                    return SettlementOutcome::failed(SettlementErrorKind::InvalidOnChain, None);
                }
                Err(e) => warn!(error = %e, "Simulation unavailable, submitting anyway"),
            }
        }

        // 4. Submission
        let tx_hash = match self
            .chain
            .submit(self.params.contract, calldata, &self.params.gas)
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(ChainError::Reverted(reason)) => {
                info!(reason = %reason, "Submission rejected as reverting");
                return SettlementOutcome::failed(SettlementErrorKind::InvalidOnChain, None);
            }
            Err(e) => {
                error!(error = %e, "Submission failed");
                return SettlementOutcome::failed(SettlementErrorKind::Unknown, None);
            }
        };

        // 5. Confirmation
        let confirmation = match self
            .chain
            .wait_for_confirmation(tx_hash, self.params.confirmation_timeout)
            .await
        {
            Ok(confirmation) => confirmation,
            Err(e) => {
                warn!(tx_hash = %tx_hash, error = %e, "No confirmation, tracking transaction");
                self.in_flight.insert(
                    order.hash,
                    InFlight {
                        tx_hash,
                        submitted_at: Instant::now(),
                    },
                );
                let kind = match e {
                    ChainError::Timeout(_) => SettlementErrorKind::ConfirmationTimeout,
                    _ => SettlementErrorKind::Unknown,
                };
                return SettlementOutcome::failed(kind, Some(tx_hash));
            }
        };

        if !confirmation.success {
            warn!(
                tx_hash = %tx_hash,
                block = confirmation.block_number.unwrap_or(0),
                gas_used = confirmation.gas_used,
                "Settlement transaction reverted"
            );
            return SettlementOutcome::failed(SettlementErrorKind::TransactionFailed, Some(tx_hash));
        }

        // 6. Store update
        self.record(order, &confirmation).await
    }

    /// Look up a transaction left over from an earlier timeout.
    ///
    /// `Some` ends the attempt (settled, or still pending); `None` means no
    /// usable record and the caller proceeds with a fresh settlement.
    async fn resume_in_flight(&self, order: &Order) -> Option<SettlementOutcome> {
        let entry = self.in_flight.get(&order.hash).map(|e| *e)?;

        let max_age = self.params.confirmation_timeout * IN_FLIGHT_EXPIRY_FACTOR;
        if entry.submitted_at.elapsed() > max_age {
            warn!(
                tx_hash = %entry.tx_hash,
                age_secs = entry.submitted_at.elapsed().as_secs(),
                "Dropping stale in-flight settlement"
            );
            self.in_flight.remove(&order.hash);
            return None;
        }

        match self.chain.transaction_receipt(entry.tx_hash).await {
            Ok(Some(confirmation)) if confirmation.success => {
                info!(tx_hash = %entry.tx_hash, "Earlier settlement confirmed");
                self.in_flight.remove(&order.hash);
                Some(self.record(order, &confirmation).await)
            }
            Ok(Some(_)) => {
                info!(tx_hash = %entry.tx_hash, "Earlier settlement reverted, retrying");
                self.in_flight.remove(&order.hash);
                None
            }
            Ok(None) => {
                debug!(tx_hash = %entry.tx_hash, "Earlier settlement still pending");
                Some(SettlementOutcome::failed(
                    SettlementErrorKind::ConfirmationTimeout,
                    Some(entry.tx_hash),
                ))
            }
            Err(e) => {
                warn!(tx_hash = %entry.tx_hash, error = %e, "Receipt lookup failed");
                Some(SettlementOutcome::failed(
                    SettlementErrorKind::ConfirmationTimeout,
                    Some(entry.tx_hash),
                ))
            }
        }
    }

    /// Move a confirmed order to its post-fill status.
    ///
    /// The chain is already settled at this point; a failed write is reported
    /// for reconciliation, never as a failed settlement.
    async fn record(&self, order: &Order, confirmation: &Confirmation) -> SettlementOutcome {
        let tx_hash = confirmation.tx_hash;
        let target = match confirmation.remaining_making(self.params.contract, order.hash.0) {
            Some(remaining) if !remaining.is_zero() => OrderStatus::PartiallyFilled,
            _ => OrderStatus::Filled,
        };

        let result = self
            .store
            .transition_status(
                &order.hash,
                &OrderStatus::ACTIVE,
                target,
                StatusUpdate::settlement(tx_hash, Utc::now()),
            )
            .await;

        match result {
            Ok(0) => {
                warn!(
                    tx_hash = %tx_hash,
                    target_status = %target,
                    "Settled on chain but order already left an active status"
                );
                SettlementOutcome::settled(tx_hash, None)
            }
            Ok(_) => {
                info!(
                    tx_hash = %tx_hash,
                    status = %target,
                    block = confirmation.block_number.unwrap_or(0),
                    gas_used = confirmation.gas_used,
                    "Order settled"
                );
                SettlementOutcome::settled(tx_hash, Some(target))
            }
            Err(e) => {
                error!(
                    order_hash = %order.hash,
                    tx_hash = %tx_hash,
                    target_status = %target,
                    error = %e,
                    "RECONCILIATION REQUIRED: settlement confirmed but order status not recorded"
                );
                SettlementOutcome::settled(tx_hash, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryOrderStore;
    use crate::test_support::{order_fixture, MockChain, MAKER, SETTLEMENT_CONTRACT};

    fn params() -> SettlementParams {
        SettlementParams {
            contract: SETTLEMENT_CONTRACT,
            gas: GasParams::from_gwei("eip1559", 300_000, 50.0, 2.0),
            min_native_balance: U256::from(10_000_000_000_000_000u64),
            confirmation_timeout: Duration::from_millis(50),
            simulate_before_submit: true,
        }
    }

    fn setup(chain: MockChain) -> (Arc<MockChain>, Arc<MemoryOrderStore>, SettlementExecutor, Order) {
        let chain = Arc::new(chain);
        let store = Arc::new(MemoryOrderStore::new());
        let order = order_fixture(1);
        store.insert(order.clone());
        let executor = SettlementExecutor::new(chain.clone(), store.clone(), params());
        (chain, store, executor, order)
    }

    async fn status(store: &MemoryOrderStore, hash: &OrderHash) -> OrderStatus {
        store.get(hash).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_successful_settlement_marks_filled() {
        let (chain, store, executor, order) = setup(MockChain::mining());
        let outcome = executor.settle(&order).await;

        assert!(outcome.success);
        assert_eq!(outcome.recorded_status, Some(OrderStatus::Filled));
        assert_eq!(chain.submissions().len(), 1);
        assert_eq!(chain.submissions()[0].0, SETTLEMENT_CONTRACT);

        let stored = store.get(&order.hash).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        assert_eq!(stored.settlement_tx, outcome.transaction_id);
        assert!(stored.last_settlement_at.is_some());
    }

    #[tokio::test]
    async fn test_partial_fill() {
        let chain = MockChain::mining().with_fill(SETTLEMENT_CONTRACT, order_fixture(1).hash, U256::from(5u64));
        let (_, store, executor, order) = setup(chain);
        let outcome = executor.settle(&order).await;
        assert_eq!(outcome.recorded_status, Some(OrderStatus::PartiallyFilled));
        assert_eq!(status(&store, &order.hash).await, OrderStatus::PartiallyFilled);
    }

    #[tokio::test]
    async fn test_fill_event_from_other_contract_is_ignored() {
        let chain = MockChain::mining()
            .with_fill(SETTLEMENT_CONTRACT, order_fixture(1).hash, U256::ZERO)
            .with_fill(MAKER, order_fixture(1).hash, U256::from(5u64));
        let (_, store, executor, order) = setup(chain);
        let outcome = executor.settle(&order).await;
        assert_eq!(outcome.recorded_status, Some(OrderStatus::Filled));
        assert_eq!(status(&store, &order.hash).await, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_insufficient_balance_submits_nothing() {
        let (chain, store, executor, order) = setup(MockChain::mining().with_balance(U256::from(1u64)));
        let outcome = executor.settle(&order).await;
        assert_eq!(outcome.error_kind, Some(SettlementErrorKind::InsufficientBalance));
        assert!(chain.submissions().is_empty());
        assert_eq!(status(&store, &order.hash).await, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_malformed_order() {
        let (chain, _, executor, mut order) = setup(MockChain::mining());
        order.signature = vec![1u8; 10].into();
        let outcome = executor.settle(&order).await;
        assert_eq!(outcome.error_kind, Some(SettlementErrorKind::MalformedOrder));
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_simulation_revert_blocks_submission() {
        let chain = MockChain::mining().with_call_error(ChainError::Reverted("bad signature".into()));
        let (chain, _, executor, order) = setup(chain);
        let outcome = executor.settle(&order).await;
        assert_eq!(outcome.error_kind, Some(SettlementErrorKind::InvalidOnChain));
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_simulation_outage_does_not_block() {
        let chain = MockChain::mining().with_call_error(ChainError::Transport("503".into()));
        let (chain, _, executor, order) = setup(chain);
        assert!(executor.settle(&order).await.success);
        assert_eq!(chain.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_reverted_receipt() {
        let (_, store, executor, order) = setup(MockChain::mining().reverting());
        let outcome = executor.settle(&order).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(SettlementErrorKind::TransactionFailed));
        assert!(outcome.transaction_id.is_some());
        assert_eq!(status(&store, &order.hash).await, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_timeout_then_resume_without_resubmitting() {
        let (chain, store, executor, order) = setup(MockChain::never_mining());

        let first = executor.settle(&order).await;
        assert_eq!(first.error_kind, Some(SettlementErrorKind::ConfirmationTimeout));
        assert_eq!(status(&store, &order.hash).await, OrderStatus::Pending);
        assert_eq!(executor.in_flight_count(), 1);

        // Still unmined: skipped, no second transaction
        let second = executor.settle(&order).await;
        assert_eq!(second.error_kind, Some(SettlementErrorKind::ConfirmationTimeout));
        assert_eq!(second.transaction_id, first.transaction_id);
        assert_eq!(chain.submissions().len(), 1);

        // Mined in the meantime: recorded without a new submission
        chain.mine_pending(true);
        let third = executor.settle(&order).await;
        assert!(third.success);
        assert_eq!(third.transaction_id, first.transaction_id);
        assert_eq!(chain.submissions().len(), 1);
        assert_eq!(executor.in_flight_count(), 0);
        assert_eq!(status(&store, &order.hash).await, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_timed_out_then_reverted_is_retried() {
        let (chain, _, executor, order) = setup(MockChain::never_mining());
        executor.settle(&order).await;
        chain.mine_pending(false);
        chain.set_auto_mine(true);

        let outcome = executor.settle(&order).await;
        assert!(outcome.success);
        assert_eq!(chain.submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_store_outage_after_confirmation_still_succeeds() {
        let (_, store, executor, order) = setup(MockChain::mining());
        store.set_unavailable(true);
        let outcome = executor.settle(&order).await;
        assert!(outcome.success);
        assert!(outcome.transaction_id.is_some());
        assert_eq!(outcome.recorded_status, None);
    }

    #[tokio::test]
    async fn test_lost_race_is_still_success() {
        let (_, store, executor, order) = setup(MockChain::mining());
        store
            .transition_status(&order.hash, &OrderStatus::ACTIVE, OrderStatus::Expired, StatusUpdate::default())
            .await
            .unwrap();

        let outcome = executor.settle(&order).await;
        assert!(outcome.success);
        assert_eq!(outcome.recorded_status, None);
        assert_eq!(status(&store, &order.hash).await, OrderStatus::Expired);
    }

    #[tokio::test]
    async fn test_reconcile_records_mined_fill_without_settle() {
        let (chain, store, executor, order) = setup(MockChain::never_mining());
        executor.settle(&order).await;
        assert_eq!(executor.reconcile_in_flight().await, 0);
        assert_eq!(executor.in_flight_count(), 1);

        chain.mine_pending(true);
        assert_eq!(executor.reconcile_in_flight().await, 1);
        assert_eq!(executor.in_flight_count(), 0);
        assert_eq!(chain.submissions().len(), 1);

        let stored = store.get(&order.hash).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        assert_eq!(stored.settlement_tx, Some(B256::from(U256::from(1u64).to_be_bytes::<32>())));
    }

    #[tokio::test]
    async fn test_reconcile_forgets_reverted_and_inactive() {
        let (chain, store, executor, order) = setup(MockChain::never_mining());
        executor.settle(&order).await;
        chain.mine_pending(false);
        assert_eq!(executor.reconcile_in_flight().await, 0);
        assert_eq!(executor.in_flight_count(), 0);
        assert_eq!(status(&store, &order.hash).await, OrderStatus::Pending);

        // Unmined, but the order was cancelled meanwhile
        executor.settle(&order).await;
        assert_eq!(executor.in_flight_count(), 1);
        store
            .transition_status(&order.hash, &OrderStatus::ACTIVE, OrderStatus::Cancelled, StatusUpdate::default())
            .await
            .unwrap();
        assert_eq!(executor.reconcile_in_flight().await, 0);
        assert_eq!(executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_entry_during_store_outage() {
        let (chain, store, executor, order) = setup(MockChain::never_mining());
        executor.settle(&order).await;
        chain.mine_pending(true);

        store.set_unavailable(true);
        assert_eq!(executor.reconcile_in_flight().await, 0);
        assert_eq!(executor.in_flight_count(), 1);

        store.set_unavailable(false);
        assert_eq!(executor.reconcile_in_flight().await, 1);
        assert_eq!(status(&store, &order.hash).await, OrderStatus::Filled);
    }
}
