//! Run command implementation
//!
//! Drives the runtime with a built-in market-watch strategy: resolve the
//! guard-selected market per asset, follow its order book, refetch and
//! resubscribe at every rollover, and append observed fills to the trade
//! log.

use crate::bot::{BotConfig, BotHooks, BotRuntime};
use crate::clock::MarketClock;
use crate::config::{Config, ExecutionMode};
use crate::exchange::{
    BookUpdate, Credentials, ExchangeError, ExchangeSession, FillEvent, KalshiSession,
    PolymarketSession,
};
use crate::market::{KalshiMarketFinder, MarketFinder, MarketWindow, PolymarketMarketFinder};
use crate::tradelog::{TradeLog, TradeRecord};
use async_trait::async_trait;
use clap::Args;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::mpsc;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Venue to run against, overriding the config (polymarket or kalshi)
    #[arg(long)]
    pub venue: Option<String>,

    /// Assets to track, overriding the config
    #[arg(long)]
    pub asset: Vec<String>,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let venue = self
            .venue
            .clone()
            .unwrap_or_else(|| config.bot.venue.clone());
        let assets = if self.asset.is_empty() {
            config.bot.assets.clone()
        } else {
            self.asset.clone()
        };

        let clock = MarketClock::new(config.bot.window_length(), config.bot.rollover_guard());
        let hooks = MarketWatchHooks::build(&venue, assets.clone(), clock.clone(), config)?;

        let mut runtime = BotRuntime::new(
            BotConfig {
                tick_interval: config.bot.tick_interval(),
                assets,
            },
            clock,
            hooks,
        );

        let shutdown = runtime.shutdown_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.shutdown();
            }
        });

        runtime.run().await?;
        Ok(())
    }
}

/// Built-in watcher strategy
struct MarketWatchHooks {
    clock: MarketClock,
    finder: Box<dyn MarketFinder>,
    session: Option<Box<dyn ExchangeSession>>,
    assets: Vec<String>,
    markets: HashMap<String, MarketWindow>,
    book_rx: HashMap<String, mpsc::Receiver<BookUpdate>>,
    best: HashMap<String, (Option<Decimal>, Option<Decimal>)>,
    fills_rx: Option<mpsc::Receiver<FillEvent>>,
    trade_log: Option<TradeLog>,
}

impl MarketWatchHooks {
    fn build(
        venue: &str,
        assets: Vec<String>,
        clock: MarketClock,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let (finder, session): (Box<dyn MarketFinder>, Option<Box<dyn ExchangeSession>>) =
            match venue {
                "polymarket" => {
                    let creds = Credentials::from_env("POLYMARKET")
                        .unwrap_or_else(|_| Credentials::anonymous());
                    let address = std::env::var("POLYMARKET_ADDRESS").unwrap_or_default();
                    let session = PolymarketSession::new(creds, address).with_backoff(
                        config.stream.initial_backoff(),
                        config.stream.backoff_multiplier,
                        config.stream.max_backoff(),
                    );
                    (
                        Box::new(PolymarketMarketFinder::new()?),
                        Some(Box::new(session) as Box<dyn ExchangeSession>),
                    )
                }
                "kalshi" => {
                    let session = match Credentials::from_env("KALSHI") {
                        Ok(creds) => Some(Box::new(
                            KalshiSession::new(creds).with_backoff(
                                config.stream.initial_backoff(),
                                config.stream.backoff_multiplier,
                                config.stream.max_backoff(),
                            ),
                        )
                            as Box<dyn ExchangeSession>),
                        Err(e) => {
                            tracing::warn!(error = %e, "running without a kalshi session");
                            None
                        }
                    };
                    (Box::new(KalshiMarketFinder::new()?), session)
                }
                other => anyhow::bail!("unknown venue: {other}"),
            };

        let trade_log = if config.trade_log.enabled {
            Some(TradeLog::new(
                config.trade_log.dir.clone(),
                config.execution.mode.to_string(),
            ))
        } else {
            None
        };
        if config.execution.mode == ExecutionMode::Live {
            tracing::warn!("live mode: fills will be logged against real positions");
        }

        Ok(Self {
            clock,
            finder,
            session,
            assets,
            markets: HashMap::new(),
            book_rx: HashMap::new(),
            best: HashMap::new(),
            fills_rx: None,
            trade_log,
        })
    }

    /// Resolve the guard-selected market for an asset and follow its book
    async fn track_asset(&mut self, asset: &str) -> anyhow::Result<()> {
        let market = match self.finder.smart_market(asset, &self.clock).await? {
            Some(market) => market,
            None => {
                tracing::warn!(%asset, "no market found for the selected window");
                self.markets.remove(asset);
                self.book_rx.remove(asset);
                return Ok(());
            }
        };

        if let Some(session) = self.session.as_mut() {
            if let Some(old) = self.markets.get(asset) {
                session.unsubscribe_orderbook(&old.yes_instrument).await?;
            }
            match session.subscribe_orderbook(&market.yes_instrument).await {
                Ok(rx) => {
                    self.book_rx.insert(asset.to_string(), rx);
                }
                Err(ExchangeError::NotConnected) => {
                    tracing::debug!(%asset, "session not connected, book feed skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            %asset,
            market_id = %market.market_id,
            window_start = %market.window.start,
            window_end = %market.window.end,
            "tracking market"
        );
        self.markets.insert(asset.to_string(), market);
        Ok(())
    }

    fn drain_books(&mut self) {
        for (asset, rx) in self.book_rx.iter_mut() {
            while let Ok(update) = rx.try_recv() {
                self.best
                    .insert(asset.clone(), (update.best_bid(), update.best_ask()));
            }
        }
    }

    fn asset_for_instrument(&self, instrument_id: &str) -> Option<&MarketWindow> {
        self.markets
            .values()
            .find(|m| m.yes_instrument == instrument_id || m.no_instrument == instrument_id)
    }

    fn drain_fills(&mut self) -> anyhow::Result<()> {
        let Some(rx) = self.fills_rx.as_mut() else {
            return Ok(());
        };

        let mut fills = Vec::new();
        while let Ok(fill) = rx.try_recv() {
            fills.push(fill);
        }

        for fill in fills {
            let (asset, market_id) = match self.asset_for_instrument(&fill.instrument_id) {
                Some(market) => (market.asset.clone(), market.market_id.clone()),
                None => (String::new(), String::new()),
            };
            tracing::info!(
                order_id = %fill.order_id,
                instrument = %fill.instrument_id,
                side = %fill.side,
                price = %fill.price,
                size = %fill.size,
                "fill observed"
            );
            if let Some(log) = self.trade_log.as_mut() {
                log.append(&TradeRecord {
                    timestamp: fill.timestamp,
                    asset,
                    market_id,
                    side: fill.side.to_string(),
                    price: fill.price,
                    size: fill.size,
                    order_id: fill.order_id.clone(),
                    status: "filled".to_string(),
                })?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BotHooks for MarketWatchHooks {
    async fn setup(&mut self) -> anyhow::Result<()> {
        if let Some(session) = self.session.as_mut() {
            session.connect().await?;
            match session.subscribe_fills().await {
                Ok(rx) => self.fills_rx = Some(rx),
                Err(ExchangeError::Credentials(_)) => {
                    tracing::info!("no credentials, fill feed disabled");
                }
                Err(e) => return Err(e.into()),
            }
        }

        for asset in self.assets.clone() {
            self.track_asset(&asset).await?;
        }
        Ok(())
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        self.drain_books();
        self.drain_fills()?;

        for (asset, market) in &self.markets {
            let remaining = self.clock.seconds_remaining(&market.window);
            let (bid, ask) = self.best.get(asset).copied().unwrap_or((None, None));
            tracing::debug!(
                %asset,
                market_id = %market.market_id,
                remaining_secs = remaining.as_secs(),
                best_bid = ?bid,
                best_ask = ?ask,
                "tick"
            );
        }
        Ok(())
    }

    async fn on_rollover(&mut self) -> anyhow::Result<()> {
        // Fresh windows mean fresh instrument ids; stale books go with them
        self.best.clear();
        for asset in self.assets.clone() {
            self.track_asset(&asset).await?;
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        if let Some(session) = self.session.as_mut() {
            session.disconnect().await?;
        }
        Ok(())
    }
}
