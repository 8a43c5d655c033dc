//! Polymarket market finder
//!
//! Slugs for the recurring up/down series are deterministic: the series
//! prefix plus the window's start timestamp. One Gamma API fetch resolves a
//! window to its condition id and CLOB token ids.

use super::{MarketFinder, MarketWindow};
use crate::clock::Window;
use crate::exchange::ExchangeError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Gamma API base URL
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Slug prefix for an asset's 15-minute up/down series
fn slug_prefix(asset: &str) -> Option<&'static str> {
    match asset.to_lowercase().as_str() {
        "btc" => Some("btc-updown-15m"),
        "eth" => Some("eth-updown-15m"),
        "sol" => Some("sol-updown-15m"),
        "xrp" => Some("xrp-updown-15m"),
        _ => None,
    }
}

/// Market slug for a window: `<prefix>-<window start timestamp>`
fn window_slug(prefix: &str, window: &Window) -> String {
    format!("{prefix}-{}", window.start.timestamp())
}

/// Finds Polymarket up/down markets by deterministic slug
pub struct PolymarketMarketFinder {
    http: reqwest::Client,
    base_url: String,
}

impl PolymarketMarketFinder {
    /// Create a finder against the public Gamma API
    pub fn new() -> Result<Self, ExchangeError> {
        Self::with_base_url(GAMMA_API_URL)
    }

    /// Create a finder against a custom endpoint
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    async fn fetch_by_slug(&self, slug: &str) -> Result<Option<GammaMarket>, ExchangeError> {
        let url = format!("{}/markets/slug/{slug}", self.base_url);
        tracing::debug!(%url, "fetching market by slug");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if status.as_u16() == 404 {
            tracing::debug!(%slug, "market not found");
            return Ok(None);
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Venue {
                status: status.as_u16(),
                body: text,
            });
        }

        let market: GammaMarket = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("gamma market: {e}")))?;
        Ok(Some(market))
    }
}

#[async_trait]
impl MarketFinder for PolymarketMarketFinder {
    fn venue(&self) -> &'static str {
        "polymarket"
    }

    async fn market_for_window(
        &self,
        asset: &str,
        window: &Window,
    ) -> Result<Option<MarketWindow>, ExchangeError> {
        let prefix = match slug_prefix(asset) {
            Some(prefix) => prefix,
            None => {
                tracing::warn!(%asset, "unsupported asset for polymarket up/down series");
                return Ok(None);
            }
        };

        let slug = window_slug(prefix, window);
        let market = match self.fetch_by_slug(&slug).await? {
            Some(market) => market,
            None => return Ok(None),
        };

        match market.into_market_window(asset, *window) {
            Some(found) => {
                tracing::info!(
                    asset = %found.asset,
                    market_id = %found.market_id,
                    window_start = %found.window.start,
                    "resolved polymarket market"
                );
                Ok(Some(found))
            }
            None => Ok(None),
        }
    }
}

/// Market response from the Gamma API
///
/// `clobTokenIds` and `outcomes` arrive as JSON-encoded strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    condition_id: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    closed: bool,
    clob_token_ids: Option<String>,
    outcomes: Option<String>,
}

impl GammaMarket {
    /// Map outcome labels to token ids; "Up" is the yes side
    fn into_market_window(self, asset: &str, window: Window) -> Option<MarketWindow> {
        if self.closed {
            tracing::debug!(slug = %self.slug, "market already closed");
            return None;
        }

        let token_ids: Vec<String> = serde_json::from_str(self.clob_token_ids.as_deref()?).ok()?;
        let outcomes: Vec<String> = self
            .outcomes
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| vec!["Up".to_string(), "Down".to_string()]);

        let index_of = |label: &str| {
            outcomes
                .iter()
                .position(|o| o.eq_ignore_ascii_case(label))
        };
        let yes_idx = index_of("up").or_else(|| index_of("yes")).unwrap_or(0);
        let no_idx = index_of("down").or_else(|| index_of("no")).unwrap_or(1);

        Some(MarketWindow {
            asset: asset.to_uppercase(),
            market_id: self.condition_id,
            yes_instrument: token_ids.get(yes_idx)?.clone(),
            no_instrument: token_ids.get(no_idx)?.clone(),
            window,
        })
    }
}
