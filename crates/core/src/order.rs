//! Persisted order model and its status state machine.

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use resolver_chain::OrderPayload;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

//--------------------------------------        OrderHash        -------------------------------------------------------

/// Content-derived order identity, computed by the signing side.
///
/// The resolver never recomputes it. It equals the `orderHash` the protocol
/// reports in its fill events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderHash(pub B256);

impl Display for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for OrderHash {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<B256>()
            .map(OrderHash)
            .map_err(|e| ParseError(format!("invalid order hash {s:?}: {e}")))
    }
}

impl From<B256> for OrderHash {
    fn from(hash: B256) -> Self {
        Self(hash)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ParseError(pub String);

//--------------------------------------       OrderStatus       -------------------------------------------------------

/// Order lifecycle status.
///
/// `Filled`, `Cancelled` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Statuses an order can still be settled or expired from.
    pub const ACTIVE: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::PartiallyFilled];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PartiallyFilled => "partiallyFilled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => next != OrderStatus::Pending,
            OrderStatus::PartiallyFilled => next != OrderStatus::Pending,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired => false,
        }
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "partiallyFilled" | "partially_filled" => Ok(Self::PartiallyFilled),
            "filled" => Ok(Self::Filled),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            s => Err(ParseError(format!("invalid order status: {s}"))),
        }
    }
}

//--------------------------------------          Order          -------------------------------------------------------

/// A signed maker order as persisted by the order store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub hash: OrderHash,
    pub maker: Address,
    pub receiver: Option<Address>,
    pub maker_asset: Address,
    pub taker_asset: Address,
    /// Amount of `maker_asset` offered, in base units
    pub making_amount: U256,
    /// Amount of `taker_asset` asked, in base units
    pub taking_amount: U256,
    pub salt: U256,
    /// Opaque protocol payloads, forwarded untouched
    pub signature: Bytes,
    pub traits: Bytes,
    pub extension: Bytes,
    pub expires_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_settlement_at: Option<DateTime<Utc>>,
    pub settlement_tx: Option<B256>,
}

impl Order {
    /// Active and not yet past its deadline.
    pub fn is_executable_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.expires_at > now
    }

    /// Protocol view used for call reconstruction.
    pub fn payload(&self) -> OrderPayload<'_> {
        OrderPayload {
            salt: self.salt,
            maker: self.maker,
            receiver: self.receiver,
            maker_asset: self.maker_asset,
            taker_asset: self.taker_asset,
            making_amount: self.making_amount,
            taking_amount: self.taking_amount,
            traits: &self.traits,
            signature: &self.signature,
            extension: &self.extension,
        }
    }
}

/// Extra columns written together with a status transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub settled_at: Option<DateTime<Utc>>,
    pub settlement_tx: Option<B256>,
}

impl StatusUpdate {
    pub fn settlement(tx_hash: B256, at: DateTime<Utc>) -> Self {
        Self {
            settled_at: Some(at),
            settlement_tx: Some(tx_hash),
        }
    }
}
