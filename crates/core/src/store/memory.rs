//! In-process order store with the same compare-and-swap semantics as the
//! database backend. Used for tests and `DATABASE_URL=memory://` dry runs.

use super::{check_transition, OrderStore, StoreError};
use crate::order::{Order, OrderHash, OrderStatus, StatusUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<OrderHash, Order>>,
    /// Simulated outage: every call fails while set
    unavailable: AtomicBool,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an order.
    pub fn insert(&self, order: Order) {
        self.orders.lock().insert(order.hash, order);
    }

    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }

    /// Make every subsequent call fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn executable_orders(&self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        self.ensure_available()?;
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .values()
            .filter(|o| o.is_executable_at(now))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.hash.cmp(&b.hash)));
        Ok(orders)
    }

    async fn transition_status(
        &self,
        hash: &OrderHash,
        from: &[OrderStatus],
        to: OrderStatus,
        update: StatusUpdate,
    ) -> Result<u64, StoreError> {
        check_transition(from, to)?;
        self.ensure_available()?;
        let mut orders = self.orders.lock();
        let Some(order) = orders.get_mut(hash) else {
            return Ok(0);
        };
        if !from.contains(&order.status) {
            return Ok(0);
        }
        order.status = to;
        order.updated_at = Utc::now();
        if update.settled_at.is_some() {
            order.last_settlement_at = update.settled_at;
        }
        if update.settlement_tx.is_some() {
            order.settlement_tx = update.settlement_tx;
        }
        Ok(1)
    }

    async fn expire_orders(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let mut changed = 0;
        for order in self.orders.lock().values_mut() {
            if order.status.is_active() && order.expires_at < now {
                order.status = OrderStatus::Expired;
                order.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn get(&self, hash: &OrderHash) -> Result<Option<Order>, StoreError> {
        self.ensure_available()?;
        Ok(self.orders.lock().get(hash).cloned())
    }
}
