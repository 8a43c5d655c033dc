//! Exchange types shared by every venue adapter

use crate::ws::StreamError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trade side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Binary-market outcome held by a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Yes,
    No,
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// True for statuses that can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// An order accepted by a venue
///
/// Created by a placement call and mutated only by status queries or
/// fill-stream updates, never speculatively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Venue-assigned order identifier
    pub order_id: String,
    /// Instrument (token/ticker) the order is on
    pub instrument_id: String,
    /// Trade side
    pub side: Side,
    /// Decimal price in [0, 1]
    pub price: Decimal,
    /// Order size
    pub size: Decimal,
    /// Current status
    pub status: OrderStatus,
    /// Filled size so far
    pub filled_size: Decimal,
}

/// Snapshot of an order's current status from the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderState {
    pub status: OrderStatus,
    pub filled_size: Decimal,
}

/// Read-only position snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Instrument the position is held in
    pub instrument_id: String,
    /// Market the instrument belongs to
    pub market_id: String,
    /// Which outcome the position is long
    pub outcome: Outcome,
    /// Position size
    pub size: Decimal,
    /// Average entry price, decimal in [0, 1]
    pub avg_price: Decimal,
}

/// Read-only historical trade snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub instrument_id: String,
    pub market_id: String,
    pub side: Side,
    /// Decimal price in [0, 1]
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A price level in an order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book update delivered by an orderbook subscription
#[derive(Debug, Clone)]
pub struct BookUpdate {
    pub instrument_id: String,
    /// Bids, best first
    pub bids: Vec<PriceLevel>,
    /// Asks, best first
    pub asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

impl BookUpdate {
    /// Best (highest) bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Best (lowest) ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

/// Fill notification delivered by a fills subscription
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub order_id: String,
    pub instrument_id: String,
    pub side: Side,
    /// Decimal price in [0, 1]
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Errors raised by exchange sessions
///
/// Business faults propagate unchanged to the immediate caller; no retries
/// happen at this layer.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Venue refused the order
    #[error("order rejected: {reason}")]
    OrderRejected { reason: String },
    /// Unknown or already-terminal order id
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    /// Operation requires `connect()` first
    #[error("session is not connected")]
    NotConnected,
    /// Venue returned a non-success HTTP status
    #[error("venue returned {status}: {body}")]
    Venue { status: u16, body: String },
    /// HTTP transport failure
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Venue response did not match the expected shape
    #[error("failed to decode venue response: {0}")]
    Decode(String),
    /// Underlying stream error
    #[error(transparent)]
    Stream(#[from] StreamError),
    /// Missing or malformed credentials
    #[error("credentials error: {0}")]
    Credentials(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_display() {
        assert_eq!(Side::Buy.to_string(), "BUY");
        assert_eq!(Side::Sell.to_string(), "SELL");
    }

    #[test]
    fn test_order_status_terminal() {
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_book_update_best_prices() {
        let update = BookUpdate {
            instrument_id: "tok".to_string(),
            bids: vec![
                PriceLevel {
                    price: dec!(0.52),
                    size: dec!(100),
                },
                PriceLevel {
                    price: dec!(0.51),
                    size: dec!(50),
                },
            ],
            asks: vec![PriceLevel {
                price: dec!(0.54),
                size: dec!(75),
            }],
            timestamp: Utc::now(),
        };

        assert_eq!(update.best_bid(), Some(dec!(0.52)));
        assert_eq!(update.best_ask(), Some(dec!(0.54)));
    }

    #[test]
    fn test_book_update_empty_sides() {
        let update = BookUpdate {
            instrument_id: "tok".to_string(),
            bids: vec![],
            asks: vec![],
            timestamp: Utc::now(),
        };
        assert_eq!(update.best_bid(), None);
        assert_eq!(update.best_ask(), None);
    }

    #[test]
    fn test_exchange_error_display() {
        let err = ExchangeError::OrderRejected {
            reason: "price outside (0, 1)".to_string(),
        };
        assert_eq!(err.to_string(), "order rejected: price outside (0, 1)");

        let err = ExchangeError::Venue {
            status: 503,
            body: "maintenance".to_string(),
        };
        assert_eq!(err.to_string(), "venue returned 503: maintenance");
    }
}
