//! Expiry sweeper: moves active orders past their deadline to `expired`.

use crate::store::{OrderStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ExpirySweeper {
    store: Arc<dyn OrderStore>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Expire every active order whose deadline has passed.
    ///
    /// Single conditional update; safe to run concurrently with itself and
    /// with settlements. Zero matches is not an error.
    pub async fn sweep_expired(&self) -> Result<u64, StoreError> {
        self.sweep_expired_at(Utc::now()).await
    }

    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let count = self.store.expire_orders(now).await?;
        if count > 0 {
            info!(count = count, "Expired orders swept");
        } else {
            debug!("No orders to expire");
        }
        Ok(count)
    }
}
