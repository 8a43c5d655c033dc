//! Markets command implementation

use crate::clock::MarketClock;
use crate::config::Config;
use crate::market::{KalshiMarketFinder, MarketFinder, MarketWindow, PolymarketMarketFinder};
use clap::Args;

#[derive(Args, Debug)]
pub struct MarketsArgs {
    /// Asset to look up
    #[arg(long, default_value = "BTC")]
    pub asset: String,

    /// Venue to query, overriding the config (polymarket or kalshi)
    #[arg(long)]
    pub venue: Option<String>,
}

impl MarketsArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let venue = self
            .venue
            .clone()
            .unwrap_or_else(|| config.bot.venue.clone());
        let finder: Box<dyn MarketFinder> = match venue.as_str() {
            "polymarket" => Box::new(PolymarketMarketFinder::new()?),
            "kalshi" => Box::new(KalshiMarketFinder::new()?),
            other => anyhow::bail!("unknown venue: {other}"),
        };

        let clock = MarketClock::new(config.bot.window_length(), config.bot.rollover_guard());

        println!("{} markets for {} ({})", finder.venue(), self.asset, venue);
        println!(
            "  window length: {}s, rollover guard: {}s",
            config.bot.window_length_secs, config.bot.rollover_guard_secs
        );
        println!(
            "  current window: {} .. {} ({}s remaining)",
            clock.current_window().start,
            clock.current_window().end,
            clock.seconds_remaining(&clock.current_window()).as_secs()
        );

        print_market(
            "current",
            finder.current_market(&self.asset, &clock).await?,
        );
        print_market("next", finder.next_market(&self.asset, &clock).await?);
        print_market(
            "selected",
            finder.smart_market(&self.asset, &clock).await?,
        );

        Ok(())
    }
}

fn print_market(label: &str, market: Option<MarketWindow>) {
    match market {
        Some(market) => {
            println!("  {label}: {}", market.market_id);
            println!("    yes instrument: {}", market.yes_instrument);
            println!("    no instrument:  {}", market.no_instrument);
            println!(
                "    window: {} .. {}",
                market.window.start, market.window.end
            );
        }
        None => println!("  {label}: not found"),
    }
}
