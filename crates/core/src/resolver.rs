//! Resolver loop.
//!
//! One tick: follow up unconfirmed settlements, sweep expired orders, fetch
//! executable orders oldest first, then evaluate and settle them one at a
//! time. Ticks never overlap; a slow
//! tick pushes the next one back.

use crate::config::{ResolverConfig, TokenRegistry};
use crate::order::Order;
use crate::profitability::{ProfitabilityEvaluator, ProfitabilityParams};
use crate::settlement::{SettlementExecutor, SettlementParams};
use crate::store::{OrderStore, StoreError};
use crate::sweeper::ExpirySweeper;
use crate::u256_math::format_wad;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use resolver_api::PriceFeed;
use resolver_chain::ChainClient;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Fills from earlier ticks recorded once their receipt showed up
    pub reconciled: usize,
    pub expired: u64,
    pub candidates: usize,
    pub skipped: usize,
    pub settled: usize,
    pub failed: usize,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reconciled={} expired={} candidates={} skipped={} settled={} failed={}",
            self.reconciled,
            self.expired, self.candidates, self.skipped, self.settled, self.failed
        )
    }
}

/// What happened to one candidate.
enum Disposition {
    Skipped,
    Settled,
    Failed,
}

pub struct Resolver {
    store: Arc<dyn OrderStore>,
    sweeper: ExpirySweeper,
    evaluator: ProfitabilityEvaluator,
    executor: SettlementExecutor,
    poll_interval: Duration,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes ticks from the loop and direct callers
    tick_lock: tokio::sync::Mutex<()>,
}

impl Resolver {
    /// Wire the components from configuration.
    pub fn new(
        config: &ResolverConfig,
        store: Arc<dyn OrderStore>,
        chain: Arc<dyn ChainClient>,
        prices: Arc<dyn PriceFeed>,
        tokens: Arc<TokenRegistry>,
    ) -> Self {
        let evaluator =
            ProfitabilityEvaluator::new(prices, tokens, ProfitabilityParams::from_config(config));
        let executor =
            SettlementExecutor::new(chain, store.clone(), SettlementParams::from_config(config));
        Self::from_parts(store, evaluator, executor, config.poll_interval())
    }

    pub fn from_parts(
        store: Arc<dyn OrderStore>,
        evaluator: ProfitabilityEvaluator,
        executor: SettlementExecutor,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            sweeper: ExpirySweeper::new(store.clone()),
            store,
            evaluator,
            executor,
            poll_interval,
            running: AtomicBool::new(false),
            shutdown,
            task: Mutex::new(None),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn executor(&self) -> &SettlementExecutor {
        &self.executor
    }

    /// Start the loop: one tick now, then one per poll interval.
    ///
    /// Returns `false` if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Resolver already running");
            return false;
        }
        self.shutdown.send_replace(false);

        let resolver = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(resolver.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                resolver.guarded_tick().await;
            }
            debug!("Resolver loop exited");
        });
        *self.task.lock() = Some(handle);

        info!(poll_interval_secs = self.poll_interval.as_secs_f64(), "Resolver started");
        true
    }

    /// Stop scheduling ticks, wait for an in-flight tick, then close the store.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping resolver");
        self.shutdown.send_replace(true);

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Resolver task ended abnormally");
            }
        }

        let pending = self.executor.in_flight_count();
        if pending > 0 {
            warn!(count = pending, "Stopping with unconfirmed settlements");
        }
        self.store.close().await;
        info!("Resolver stopped");
    }

    /// Tick with errors and panics contained.
    async fn guarded_tick(&self) {
        match AssertUnwindSafe(self.tick()).catch_unwind().await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %e, "Tick failed"),
            Err(panic) => error!(panic = panic_message(&panic), "Tick panicked"),
        }
    }

    /// Run one tick.
    ///
    /// Unconfirmed settlements are reconciled before the sweep so a fill
    /// that landed on chain is never swept as expired. A sweep failure is
    /// logged and the tick continues; only failing to fetch candidates ends
    /// it early.
    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        let _guard = self.tick_lock.lock().await;
        let started = Instant::now();
        let mut report = TickReport {
            reconciled: self.executor.reconcile_in_flight().await,
            ..TickReport::default()
        };

        match self.sweeper.sweep_expired().await {
            Ok(count) => report.expired = count,
            Err(e) => warn!(error = %e, "Expiry sweep failed"),
        }

        let orders = self.store.executable_orders(Utc::now()).await?;
        report.candidates = orders.len();

        for order in &orders {
            match AssertUnwindSafe(self.process(order)).catch_unwind().await {
                Ok(Disposition::Skipped) => report.skipped += 1,
                Ok(Disposition::Settled) => report.settled += 1,
                Ok(Disposition::Failed) => report.failed += 1,
                Err(panic) => {
                    error!(order = %order.hash, panic = panic_message(&panic), "Order processing panicked");
                    report.failed += 1;
                }
            }
        }

        info!(
            reconciled = report.reconciled,
            expired = report.expired,
            candidates = report.candidates,
            skipped = report.skipped,
            settled = report.settled,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tick complete"
        );
        Ok(report)
    }

    async fn process(&self, order: &Order) -> Disposition {
        let evaluation = self.evaluator.evaluate(order).await;
        if !evaluation.is_profitable {
            info!(
                order = %order.hash,
                reason = evaluation.reason.unwrap_or("not profitable"),
                net_usd = %format_wad(evaluation.estimated_net_profit),
                "Skipping order"
            );
            return Disposition::Skipped;
        }

        info!(
            order = %order.hash,
            net_usd = %format_wad(evaluation.estimated_net_profit),
            "Settling profitable order"
        );
        let outcome = self.executor.settle(order).await;
        if outcome.success {
            info!(
                order = %order.hash,
                tx_hash = ?outcome.transaction_id,
                status = ?outcome.recorded_status,
                "Settlement succeeded"
            );
            Disposition::Settled
        } else {
            warn!(
                order = %order.hash,
                error_kind = %outcome.error_kind.map(|k| k.as_str()).unwrap_or("unknown"),
                tx_hash = ?outcome.transaction_id,
                "Settlement failed"
            );
            Disposition::Failed
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderStatus;
    use crate::store::MemoryOrderStore;
    use crate::test_support::{order_fixture, token_registry, MockChain, StaticPrices, SETTLEMENT_CONTRACT};
    use crate::u256_math::WAD;
    use alloy::primitives::U256;
    use chrono::Duration as ChronoDuration;
    use resolver_chain::GasParams;

    fn resolver(chain: Arc<MockChain>, store: Arc<MemoryOrderStore>, prices: StaticPrices) -> Arc<Resolver> {
        let evaluator = ProfitabilityEvaluator::new(
            Arc::new(prices),
            Arc::new(token_registry()),
            ProfitabilityParams {
                min_profit: WAD,
                gas_units: 100_000,
                gas_price_wei: 10_000_000_000,
                native_price_id: "eth".into(),
                fallback_native_price: U256::from(2000u64) * WAD,
            },
        );
        let executor = SettlementExecutor::new(
            chain,
            store.clone(),
            SettlementParams {
                contract: SETTLEMENT_CONTRACT,
                gas: GasParams::from_gwei("eip1559", 300_000, 50.0, 2.0),
                min_native_balance: U256::ZERO,
                confirmation_timeout: Duration::from_millis(50),
                simulate_before_submit: false,
            },
        );
        Arc::new(Resolver::from_parts(store, evaluator, executor, Duration::from_millis(20)))
    }

    fn prices() -> StaticPrices {
        StaticPrices::new(&[("usdc", 1), ("eth", 2000)])
    }

    #[tokio::test]
    async fn test_tick_settles_sweeps_and_skips() {
        let chain = Arc::new(MockChain::mining());
        let store = Arc::new(MemoryOrderStore::new());

        let profitable = order_fixture(1);
        let mut expired = order_fixture(2);
        expired.expires_at = Utc::now() - ChronoDuration::seconds(1);
        let mut losing = order_fixture(3);
        losing.taking_amount = U256::from(10_000_000_000_000_000u64);
        for o in [profitable.clone(), expired.clone(), losing.clone()] {
            store.insert(o);
        }

        let resolver = resolver(chain.clone(), store.clone(), prices());
        let report = resolver.tick().await.unwrap();

        assert_eq!(
            report,
            TickReport {
                reconciled: 0,
                expired: 1,
                candidates: 2,
                skipped: 1,
                settled: 1,
                failed: 0
            }
        );
        assert_eq!(chain.submissions().len(), 1);
        let status = |hash| {
            let store = store.clone();
            async move { store.get(&hash).await.unwrap().unwrap().status }
        };
        assert_eq!(status(profitable.hash).await, OrderStatus::Filled);
        assert_eq!(status(expired.hash).await, OrderStatus::Expired);
        assert_eq!(status(losing.hash).await, OrderStatus::Pending);

        // Terminal orders are left alone by later ticks
        let report = resolver.tick().await.unwrap();
        assert_eq!(report.settled, 0);
        assert_eq!(chain.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_tick() {
        let chain = Arc::new(MockChain::mining());
        let store = Arc::new(MemoryOrderStore::new());

        let mut broken = order_fixture(1);
        broken.signature = vec![0u8; 3].into();
        let good = order_fixture(2);
        store.insert(broken);
        store.insert(good.clone());

        let resolver = resolver(chain, store.clone(), prices());
        let report = resolver.tick().await.unwrap();
        assert_eq!((report.failed, report.settled), (1, 1));
        assert_eq!(store.get(&good.hash).await.unwrap().unwrap().status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_store_outage_fails_tick() {
        let store = Arc::new(MemoryOrderStore::new());
        store.set_unavailable(true);
        let resolver = resolver(Arc::new(MockChain::mining()), store, prices());
        assert!(resolver.tick().await.is_err());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_halts() {
        let chain = Arc::new(MockChain::mining());
        let store = Arc::new(MemoryOrderStore::new());
        let order = order_fixture(1);
        store.insert(order.clone());

        let resolver = resolver(chain.clone(), store.clone(), prices());
        assert!(resolver.start());
        assert!(!resolver.start());
        assert!(resolver.is_running());

        // First tick runs immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get(&order.hash).await.unwrap().unwrap().status, OrderStatus::Filled);

        resolver.stop().await;
        assert!(!resolver.is_running());

        // No ticks after stop
        store.insert(order_fixture(2));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(chain.submissions().len(), 1);
    }

    #[test]
    fn test_panic_message() {
        let panic: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&panic), "boom");
        let panic: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&panic), "bang");
    }
}
