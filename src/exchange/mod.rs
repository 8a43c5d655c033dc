//! Exchange session contract and venue adapters
//!
//! One uniform capability surface per venue so runtime and strategy code
//! never branch on venue identity for control flow. Adapters are explicit
//! constructions: [`PolymarketSession`], [`KalshiSession`].

mod auth;
mod credentials;
mod kalshi;
mod polymarket;
mod price;
mod types;

pub use credentials::Credentials;
pub use kalshi::KalshiSession;
pub use polymarket::PolymarketSession;
pub use price::{cents_to_decimal, decimal_to_cents, validate_order_price};
pub use types::{
    BookUpdate, ExchangeError, FillEvent, Order, OrderState, OrderStatus, Outcome, Position,
    PriceLevel, Side, Trade,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

/// Uniform exchange contract implemented by every venue adapter
///
/// Adapters expose building blocks only: no retries, no timeouts beyond the
/// HTTP client's request timeout, no fill-waiting. A failed call surfaces its
/// error to the caller immediately; composing retries is a strategy-layer
/// concern. All prices crossing this boundary are decimals in [0, 1].
#[async_trait]
pub trait ExchangeSession: Send + Sync {
    /// Venue name for logs and metrics
    fn venue(&self) -> &'static str;

    /// Establish the authenticated session
    async fn connect(&mut self) -> Result<(), ExchangeError>;

    /// Release the session and stop owned feeds; no-op when unconnected
    async fn disconnect(&mut self) -> Result<(), ExchangeError>;

    /// Place a limit order; `price` must be strictly inside (0, 1)
    ///
    /// Returns the venue-accepted order or [`ExchangeError::OrderRejected`].
    /// Never waits for a fill.
    async fn place_limit_order(
        &self,
        instrument_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<Order, ExchangeError>;

    /// Place a market order; same guarantees as limit placement, no price
    async fn place_market_order(
        &self,
        instrument_id: &str,
        side: Side,
        size: Decimal,
    ) -> Result<Order, ExchangeError>;

    /// Cancel an open order
    ///
    /// Unknown or already-terminal ids fail with
    /// [`ExchangeError::InvalidOrder`], never a crash.
    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError>;

    /// Current status and filled size, always from venue truth
    async fn get_order_status(&self, order_id: &str) -> Result<OrderState, ExchangeError>;

    /// All current positions as a read-only snapshot
    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError>;

    /// Positions filtered to one market; a pure filter over [`get_positions`](Self::get_positions)
    async fn get_positions_by_market(
        &self,
        market_id: &str,
    ) -> Result<Vec<Position>, ExchangeError> {
        let positions = self.get_positions().await?;
        Ok(positions
            .into_iter()
            .filter(|p| p.market_id == market_id)
            .collect())
    }

    /// Positions filtered to one instrument; a pure filter over [`get_positions`](Self::get_positions)
    async fn get_positions_by_instrument(
        &self,
        instrument_id: &str,
    ) -> Result<Vec<Position>, ExchangeError> {
        let positions = self.get_positions().await?;
        Ok(positions
            .into_iter()
            .filter(|p| p.instrument_id == instrument_id)
            .collect())
    }

    /// Available balance, converted to decimal units at the adapter edge
    async fn get_balance(&self) -> Result<Decimal, ExchangeError>;

    /// Historical trades, most recent first; may return fewer than `limit`
    async fn get_trade_history(&self, limit: usize) -> Result<Vec<Trade>, ExchangeError>;

    /// Subscribe to order book updates for one instrument
    ///
    /// Backed by one reconnecting stream per venue connection category; the
    /// stream resubscribes the instrument after every reconnect.
    async fn subscribe_orderbook(
        &mut self,
        instrument_id: &str,
    ) -> Result<mpsc::Receiver<BookUpdate>, ExchangeError>;

    /// Drop the order book subscription for one instrument
    ///
    /// Rollover hooks use this to swap per-window topics from the outgoing
    /// market's instrument ids to the new ones. No-op when the instrument
    /// was never subscribed.
    async fn unsubscribe_orderbook(&mut self, instrument_id: &str) -> Result<(), ExchangeError>;

    /// Subscribe to this account's fills
    async fn subscribe_fills(&mut self) -> Result<mpsc::Receiver<FillEvent>, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    /// Stub venue exposing canned positions, for the pure filter defaults
    struct StubSession {
        positions: Vec<Position>,
    }

    fn position(instrument: &str, market: &str) -> Position {
        Position {
            instrument_id: instrument.to_string(),
            market_id: market.to_string(),
            outcome: Outcome::Yes,
            size: dec!(10),
            avg_price: dec!(0.5),
        }
    }

    #[async_trait]
    impl ExchangeSession for StubSession {
        fn venue(&self) -> &'static str {
            "stub"
        }

        async fn connect(&mut self) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn place_limit_order(
            &self,
            _instrument_id: &str,
            _side: Side,
            _price: Decimal,
            _size: Decimal,
        ) -> Result<Order, ExchangeError> {
            Err(ExchangeError::NotConnected)
        }

        async fn place_market_order(
            &self,
            _instrument_id: &str,
            _side: Side,
            _size: Decimal,
        ) -> Result<Order, ExchangeError> {
            Err(ExchangeError::NotConnected)
        }

        async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
            Err(ExchangeError::InvalidOrder(order_id.to_string()))
        }

        async fn get_order_status(&self, order_id: &str) -> Result<OrderState, ExchangeError> {
            Err(ExchangeError::InvalidOrder(order_id.to_string()))
        }

        async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
            Ok(self.positions.clone())
        }

        async fn get_balance(&self) -> Result<Decimal, ExchangeError> {
            Ok(Decimal::ZERO)
        }

        async fn get_trade_history(&self, _limit: usize) -> Result<Vec<Trade>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn subscribe_orderbook(
            &mut self,
            _instrument_id: &str,
        ) -> Result<mpsc::Receiver<BookUpdate>, ExchangeError> {
            Err(ExchangeError::NotConnected)
        }

        async fn unsubscribe_orderbook(
            &mut self,
            _instrument_id: &str,
        ) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn subscribe_fills(&mut self) -> Result<mpsc::Receiver<FillEvent>, ExchangeError> {
            Err(ExchangeError::NotConnected)
        }
    }

    #[tokio::test]
    async fn test_position_filters_are_pure() {
        let session = StubSession {
            positions: vec![
                position("tok-1", "market-a"),
                position("tok-2", "market-a"),
                position("tok-3", "market-b"),
            ],
        };

        let by_market = session.get_positions_by_market("market-a").await.unwrap();
        assert_eq!(by_market.len(), 2);
        assert!(by_market.iter().all(|p| p.market_id == "market-a"));

        let by_instrument = session.get_positions_by_instrument("tok-3").await.unwrap();
        assert_eq!(by_instrument.len(), 1);
        assert_eq!(by_instrument[0].market_id, "market-b");

        let none = session.get_positions_by_market("market-c").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_filters_propagate_underlying_result() {
        let session = StubSession {
            positions: Vec::new(),
        };
        assert!(session
            .get_positions_by_instrument("anything")
            .await
            .unwrap()
            .is_empty());
    }
}
