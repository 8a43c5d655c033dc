//! Kalshi market finder
//!
//! Kalshi has no deterministic slugs; the finder lists open markets for the
//! asset's series and matches close times against the requested window.

use super::{MarketFinder, MarketWindow};
use crate::clock::Window;
use crate::exchange::ExchangeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Kalshi trade API base for market listings
pub const KALSHI_API_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Series ticker for an asset's 15-minute markets
fn series_ticker(asset: &str) -> Option<&'static str> {
    match asset.to_uppercase().as_str() {
        "BTC" => Some("KXBTC15M"),
        "ETH" => Some("KXETH15M"),
        "SOL" => Some("KXSOL15M"),
        _ => None,
    }
}

/// Finds Kalshi markets by listing the open series
pub struct KalshiMarketFinder {
    http: reqwest::Client,
    base_url: String,
}

impl KalshiMarketFinder {
    /// Create a finder against the public market listing API
    pub fn new() -> Result<Self, ExchangeError> {
        Self::with_base_url(KALSHI_API_URL)
    }

    /// Create a finder against a custom endpoint
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    async fn list_open_markets(
        &self,
        series: &str,
    ) -> Result<Vec<RawKalshiMarket>, ExchangeError> {
        let url = format!("{}/markets", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("series_ticker", series), ("status", "open")])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: MarketsEnvelope = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("markets: {e}")))?;
        Ok(parsed.markets)
    }
}

#[async_trait]
impl MarketFinder for KalshiMarketFinder {
    fn venue(&self) -> &'static str {
        "kalshi"
    }

    async fn market_for_window(
        &self,
        asset: &str,
        window: &Window,
    ) -> Result<Option<MarketWindow>, ExchangeError> {
        let series = match series_ticker(asset) {
            Some(series) => series,
            None => {
                tracing::warn!(%asset, "unsupported asset for kalshi 15-minute series");
                return Ok(None);
            }
        };

        let markets = self.list_open_markets(series).await?;
        let found = select_for_window(&markets, window).map(|m| MarketWindow {
            asset: asset.to_uppercase(),
            market_id: m.ticker.clone(),
            // One ticker carries both sides; yes/no selection happens at
            // order placement
            yes_instrument: m.ticker.clone(),
            no_instrument: m.ticker.clone(),
            window: *window,
        });

        if let Some(ref market) = found {
            tracing::info!(
                asset = %market.asset,
                ticker = %market.market_id,
                window_start = %market.window.start,
                "resolved kalshi market"
            );
        }
        Ok(found)
    }
}

/// Pick the open market whose close time matches the window's end
fn select_for_window<'a>(
    markets: &'a [RawKalshiMarket],
    window: &Window,
) -> Option<&'a RawKalshiMarket> {
    markets
        .iter()
        .filter_map(|m| m.close_time().map(|close| (m, close)))
        .find(|(_, close)| *close == window.end)
        .map(|(m, _)| m)
}

#[derive(Debug, Deserialize)]
struct MarketsEnvelope {
    #[serde(default)]
    markets: Vec<RawKalshiMarket>,
}

#[derive(Debug, Deserialize)]
struct RawKalshiMarket {
    #[serde(default)]
    ticker: String,
    #[serde(default)]
    close_time: Option<String>,
}

impl RawKalshiMarket {
    fn close_time(&self) -> Option<DateTime<Utc>> {
        self.close_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}
