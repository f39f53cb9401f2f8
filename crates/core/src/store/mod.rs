//! Order store access.
//!
//! Every status write is a conditional update: it only lands if the row's
//! current status is one of the expected `from` statuses. A return of `0`
//! means another writer (sweeper, cancellation API, a concurrent settlement)
//! got there first.

mod memory;
mod postgres;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

use crate::order::{Order, OrderHash, OrderStatus, StatusUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to decode order {hash}: {reason}")]
    Decode { hash: String, reason: String },
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
}

/// Typed access to persisted orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Orders in `pending`/`partiallyFilled` with `expires_at > now`,
    /// oldest first.
    async fn executable_orders(&self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError>;

    /// Move `hash` to `to` if its status is still one of `from`.
    ///
    /// Returns the number of rows changed (0 or 1).
    async fn transition_status(
        &self,
        hash: &OrderHash,
        from: &[OrderStatus],
        to: OrderStatus,
        update: StatusUpdate,
    ) -> Result<u64, StoreError>;

    /// Expire every active order whose deadline is strictly before `now`,
    /// in one conditional update.
    async fn expire_orders(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn get(&self, hash: &OrderHash) -> Result<Option<Order>, StoreError>;

    /// Release connections. Default: nothing to release.
    async fn close(&self) {}
}

/// Reject transitions the state machine forbids for every `from` status.
///
/// A `from` list that contains a terminal status can never be satisfied by a
/// legal write, so it is refused up front rather than silently matching.
pub(crate) fn check_transition(from: &[OrderStatus], to: OrderStatus) -> Result<(), StoreError> {
    match from.iter().find(|status| !status.can_transition_to(to)) {
        Some(bad) => Err(StoreError::IllegalTransition { from: *bad, to }),
        None => Ok(()),
    }
}
