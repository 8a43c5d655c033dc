use clap::Parser;
use pmkit::cli::{Cli, Commands};
use pmkit::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize telemetry
    let _telemetry = pmkit::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!(mode = %config.execution.mode, "starting bot");
            args.execute(&config).await?;
        }
        Commands::Markets(args) => {
            args.execute(&config).await?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!("  Assets: {}", config.bot.assets.join(", "));
            println!("  Venue: {}", config.bot.venue);
            println!(
                "  Windows: {}s (guard {}s), tick every {}ms",
                config.bot.window_length_secs,
                config.bot.rollover_guard_secs,
                config.bot.tick_interval_ms
            );
            println!(
                "  Backoff: {}ms x{} up to {}s",
                config.stream.initial_backoff_ms,
                config.stream.backoff_multiplier,
                config.stream.max_backoff_secs
            );
            println!("  Execution: {}", config.execution.mode);
            println!(
                "  Trade log: {} ({})",
                if config.trade_log.enabled {
                    "enabled"
                } else {
                    "disabled"
                },
                config.trade_log.dir.display()
            );
        }
    }

    Ok(())
}
