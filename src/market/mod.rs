//! Market discovery
//!
//! Per-venue finders resolve a time window to the venue's tradable market
//! for that window. The guard-aware selection policy lives in
//! [`crate::clock::MarketClock`]; finders only fetch.

mod kalshi;
mod polymarket;

pub use kalshi::KalshiMarketFinder;
pub use polymarket::PolymarketMarketFinder;

use crate::clock::{MarketClock, Window};
use crate::exchange::ExchangeError;
use async_trait::async_trait;

/// One tradable instance of a recurring market
///
/// Immutable once returned. A bot holds at most one current `MarketWindow`
/// per (asset, venue); after a boundary crossing the rollover hook must
/// refetch, since a stale window's instrument ids no longer trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketWindow {
    /// Asset symbol (e.g. "BTC")
    pub asset: String,
    /// Venue market identifier (condition id, ticker)
    pub market_id: String,
    /// Instrument id for the yes/up outcome
    pub yes_instrument: String,
    /// Instrument id for the no/down outcome
    pub no_instrument: String,
    /// The time window this market settles on
    pub window: Window,
}

/// Venue-specific market discovery
#[async_trait]
pub trait MarketFinder: Send + Sync {
    /// Venue name for logs
    fn venue(&self) -> &'static str;

    /// The venue's market for the given window, if it exists
    async fn market_for_window(
        &self,
        asset: &str,
        window: &Window,
    ) -> Result<Option<MarketWindow>, ExchangeError>;

    /// Market for the window containing the current time
    async fn current_market(
        &self,
        asset: &str,
        clock: &MarketClock,
    ) -> Result<Option<MarketWindow>, ExchangeError> {
        self.market_for_window(asset, &clock.current_window()).await
    }

    /// Market for the window after the current one
    async fn next_market(
        &self,
        asset: &str,
        clock: &MarketClock,
    ) -> Result<Option<MarketWindow>, ExchangeError> {
        self.market_for_window(asset, &clock.next_window()).await
    }

    /// Guard-aware market selection
    ///
    /// Near a boundary this returns the next window's market instead of the
    /// dying one, per the clock's rollover guard threshold.
    async fn smart_market(
        &self,
        asset: &str,
        clock: &MarketClock,
    ) -> Result<Option<MarketWindow>, ExchangeError> {
        self.market_for_window(asset, &clock.select_window()).await
    }
}
