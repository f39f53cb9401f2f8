//! Postgres order store.
//!
//! Expected `orders` table:
//!
//! | column               | type          |
//! |----------------------|---------------|
//! | `order_hash`         | `TEXT` (pk, `0x` hex) |
//! | `maker`, `receiver`, `maker_asset`, `taker_asset` | `TEXT` (`0x` hex, receiver nullable) |
//! | `making_amount`, `taking_amount`, `salt` | `NUMERIC(78, 0)` |
//! | `signature`, `traits`, `extension` | `TEXT` (`0x` hex) |
//! | `status`             | `TEXT`        |
//! | `expires_at`, `created_at`, `updated_at` | `TIMESTAMPTZ` |
//! | `last_settlement_at` | `TIMESTAMPTZ NULL` |
//! | `settlement_tx`      | `TEXT NULL`   |

use super::{check_transition, OrderStore, StoreError};
use crate::order::{Order, OrderHash, OrderStatus, StatusUpdate};
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const SELECT_COLUMNS: &str = r#"
    order_hash,
    maker,
    receiver,
    maker_asset,
    taker_asset,
    making_amount::text AS making_amount,
    taking_amount::text AS taking_amount,
    salt::text AS salt,
    signature,
    traits,
    extension,
    status,
    expires_at,
    created_at,
    updated_at,
    last_settlement_at,
    settlement_tx
"#;

#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Connect with a small pool; the resolver issues one query at a time.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!("Connected to order store");
        Ok(Self { pool })
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn executable_orders(&self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM orders \
             WHERE status = ANY($1) AND expires_at > $2 \
             ORDER BY created_at ASC, order_hash ASC"
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(status_names(&OrderStatus::ACTIVE))
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        debug!(count = rows.len(), "Fetched executable orders");
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn transition_status(
        &self,
        hash: &OrderHash,
        from: &[OrderStatus],
        to: OrderStatus,
        update: StatusUpdate,
    ) -> Result<u64, StoreError> {
        check_transition(from, to)?;
        let result = sqlx::query(
            r#"
                UPDATE orders
                SET status = $1,
                    updated_at = NOW(),
                    last_settlement_at = COALESCE($2, last_settlement_at),
                    settlement_tx = COALESCE($3, settlement_tx)
                WHERE order_hash = $4 AND status = ANY($5)
            "#,
        )
        .bind(to.as_str())
        .bind(update.settled_at)
        .bind(update.settlement_tx.map(|tx| format!("{tx:#x}")))
        .bind(hash.to_string())
        .bind(status_names(from))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire_orders(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
                UPDATE orders
                SET status = $1, updated_at = $2
                WHERE status = ANY($3) AND expires_at < $2
            "#,
        )
        .bind(OrderStatus::Expired.as_str())
        .bind(now)
        .bind(status_names(&OrderStatus::ACTIVE))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, hash: &OrderHash) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM orders WHERE order_hash = $1");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(hash.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Order store connections closed");
    }
}

fn status_names(statuses: &[OrderStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Raw `orders` row.
#[derive(Debug, FromRow)]
struct OrderRow {
    order_hash: String,
    maker: String,
    receiver: Option<String>,
    maker_asset: String,
    taker_asset: String,
    making_amount: String,
    taking_amount: String,
    salt: String,
    signature: String,
    traits: String,
    extension: String,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_settlement_at: Option<DateTime<Utc>>,
    settlement_tx: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let hash_str = row.order_hash.clone();
        let decode = |field: &str, reason: String| StoreError::Decode {
            hash: hash_str.clone(),
            reason: format!("{field}: {reason}"),
        };

        let address = |field: &str, value: &str| {
            Address::from_str(value.trim()).map_err(|e| decode(field, e.to_string()))
        };
        let amount = |field: &str, value: &str| {
            U256::from_str_radix(value.trim(), 10).map_err(|e| decode(field, e.to_string()))
        };
        let blob = |field: &str, value: &str| {
            hex::decode(value.trim().trim_start_matches("0x"))
                .map(Bytes::from)
                .map_err(|e| decode(field, e.to_string()))
        };

        Ok(Order {
            hash: row
                .order_hash
                .parse()
                .map_err(|e: crate::order::ParseError| decode("order_hash", e.0))?,
            maker: address("maker", &row.maker)?,
            receiver: row
                .receiver
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .map(|r| address("receiver", r))
                .transpose()?,
            maker_asset: address("maker_asset", &row.maker_asset)?,
            taker_asset: address("taker_asset", &row.taker_asset)?,
            making_amount: amount("making_amount", &row.making_amount)?,
            taking_amount: amount("taking_amount", &row.taking_amount)?,
            salt: amount("salt", &row.salt)?,
            signature: blob("signature", &row.signature)?,
            traits: blob("traits", &row.traits)?,
            extension: blob("extension", &row.extension)?,
            status: row
                .status
                .parse()
                .map_err(|e: crate::order::ParseError| decode("status", e.0))?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_settlement_at: row.last_settlement_at,
            settlement_tx: row
                .settlement_tx
                .as_deref()
                .map(|tx| B256::from_str(tx.trim()).map_err(|e| decode("settlement_tx", e.to_string())))
                .transpose()?,
        })
    }
}
