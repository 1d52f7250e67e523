//! Grid Trading Bot Binary
//!
//! Runs the split-grid engine (or the bracket variant) against a paper
//! trading market fed by a live REST ticker.
//!
//! ## Setup
//!
//! 1. Optionally create a `.env` file in the project root:
//!    ```
//!    APP_NOTIFIER__WEBHOOK_URL=https://discord.com/api/webhooks/...
//!    ```
//!
//! 2. Run the bot:
//!    ```bash
//!    cargo run --bin grid_bot -- --config bot.toml
//!    ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use split_trader::config::{Mode, Settings};
use split_trader::grid::{
    BracketTrader, GridRunner, IntervalTicks, JsonSnapshotStore, LogNotifier, Notifier,
    ShutdownSignal, WebhookNotifier,
};
use split_trader::market::{HttpPriceFeed, PaperTradingMarket, PaperTradingMarketInput};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before Settings so APP_* overrides apply
    let dotenv = dotenvy::dotenv();

    let args: Vec<String> = env::args().collect();
    let config_path = if args.len() > 2 && args[1] == "--config" {
        args[2].clone()
    } else {
        "bot.toml".to_string()
    };

    let settings = Settings::new(&config_path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str()))
        .init();

    match dotenv {
        Ok(path) => info!("Loaded environment from: {}", path.display()),
        Err(_) => info!("No .env file found, using system environment variables"),
    }
    info!("Loaded settings from {}", config_path);

    if let Err(e) = settings.validate() {
        error!("Invalid settings: {}", e);
        return Err(e.into());
    }
    let asset = settings.asset().unwrap_or_default().to_string();

    let notifier: Arc<dyn Notifier> = match &settings.notifier.webhook_url {
        Some(url) if !url.is_empty() => Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(settings.notifier.timeout_secs),
        )?),
        _ => {
            warn!("No webhook configured, alerts go to the log only");
            Arc::new(LogNotifier)
        }
    };

    let feed = HttpPriceFeed::new(
        settings.price_feed.url.clone(),
        settings.price_feed.pointer.clone(),
        Duration::from_secs(settings.price_feed.timeout_secs),
    )?;
    let market = PaperTradingMarket::new(
        PaperTradingMarketInput {
            asset: asset.clone(),
            initial_cash: settings.paper.initial_cash,
            initial_asset: settings.paper.initial_asset,
            initial_avg_cost: settings.paper.initial_avg_cost,
            fee_rate: settings.paper.fee_rate,
        },
        feed,
    );
    info!("Paper trading {} with {} cash", asset, settings.paper.initial_cash);

    let shutdown = ShutdownSignal::new();
    shutdown.install_handlers();
    let ticks = IntervalTicks::new(shutdown.clone());

    match settings.mode {
        Mode::Grid => {
            let Some(config) = settings.grid else {
                return Err("grid mode needs a [grid] section".into());
            };
            info!(
                "Starting grid bot for {}: start {}, {} levels, qty {}",
                config.asset, config.start_price, config.level_count, config.quantity
            );

            let store = JsonSnapshotStore::new(config.snapshot_path.clone());
            let mut runner = GridRunner::new(
                config,
                market.clone(),
                market,
                ticks,
                notifier,
                Box::new(store),
            )
            .await?;
            runner.run(&shutdown).await?;
        }
        Mode::Bracket => {
            let Some(config) = settings.bracket else {
                return Err("bracket mode needs a [bracket] section".into());
            };
            info!(
                "Starting bracket trader for {} with capital {}",
                config.asset, config.initial_capital
            );

            let mut trader = BracketTrader::new(config, market.clone(), market, ticks, notifier)?;
            trader.run(&shutdown).await?;
        }
    }

    info!("Bot exited");
    Ok(())
}
