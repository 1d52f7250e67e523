//! Grid bot runner - main reconciliation loop

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::config::GridConfig;
use super::errors::GridResult;
use super::executor::{GridExchange, PriceFeed};
use super::manager::GridManager;
use super::notifier::Notifier;
use super::snapshot::SnapshotStore;
use super::ticks::{ShutdownSignal, TickSource};
use super::types::BalanceSnapshot;

/// Drives a [`GridManager`] at a fixed interval until shutdown
pub struct GridRunner<E: GridExchange, P: PriceFeed, T: TickSource> {
    grid: GridManager,
    exchange: E,
    price_feed: P,
    ticks: T,
    notifier: Arc<dyn Notifier>,
    store: Box<dyn SnapshotStore>,
    loop_count: u64,
}

impl<E: GridExchange, P: PriceFeed, T: TickSource> GridRunner<E, P, T> {
    /// Build the grid fresh, or from the snapshot when resuming
    pub async fn new(
        config: GridConfig,
        exchange: E,
        price_feed: P,
        ticks: T,
        notifier: Arc<dyn Notifier>,
        store: Box<dyn SnapshotStore>,
    ) -> GridResult<Self> {
        let grid = if config.resume_from_snapshot {
            match store.load() {
                Ok(Some(records)) if !records.is_empty() => {
                    info!("Resuming grid from snapshot ({} records)", records.len());
                    GridManager::restore(config, &records, &exchange).await?
                }
                Ok(_) => {
                    info!("No snapshot to resume from, building a fresh grid");
                    GridManager::build(config)?
                }
                Err(e) => {
                    warn!("Failed to load snapshot: {}, building a fresh grid", e);
                    GridManager::build(config)?
                }
            }
        } else {
            GridManager::build(config)?
        };

        Ok(Self {
            grid,
            exchange,
            price_feed,
            ticks,
            notifier,
            store,
            loop_count: 0,
        })
    }

    pub fn grid(&self) -> &GridManager {
        &self.grid
    }

    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    /// Run until `shutdown` trips, then cancel open orders and persist
    pub async fn run(&mut self, shutdown: &ShutdownSignal) -> GridResult<()> {
        let asset = self.grid.config().asset.clone();
        let start_msg = match self.exchange.get_balance(&asset).await {
            Ok(b) => format!(
                "Grid bot started\n - asset: {}\n - levels: {}\n - cash: {:.2}\n - held: {}",
                asset,
                self.grid.levels().len(),
                b.available_cash,
                b.available_asset
            ),
            Err(e) => format!(
                "Grid bot started\n - asset: {}\n - levels: {}\n - balance unavailable: {}",
                asset,
                self.grid.levels().len(),
                e
            ),
        };
        info!("{}", start_msg.replace('\n', " "));
        self.notifier.send(&start_msg).await;

        let loop_interval = Duration::from_secs(self.grid.config().loop_interval_secs);
        let backoff = Duration::from_secs(self.grid.config().error_backoff_secs);

        while !shutdown.is_triggered() {
            match self.tick().await {
                Ok(()) => self.ticks.sleep(loop_interval).await,
                Err(e) => {
                    error!("CRITICAL: unexpected error in main loop: {}", e);
                    self.notifier
                        .send(&format!("Critical error in main loop: {}\nCheck the bot.", e))
                        .await;
                    self.ticks.sleep(backoff).await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One reconciliation pass
    pub async fn tick(&mut self) -> GridResult<()> {
        self.loop_count += 1;
        let asset = self.grid.config().asset.clone();

        let price = match self.price_feed.current_price(&asset).await {
            Ok(price) => price,
            Err(e) => {
                warn!("Price unavailable ({}), retrying next loop", e);
                return Ok(());
            }
        };

        let mut balance: Option<BalanceSnapshot> = match self.exchange.get_balance(&asset).await {
            Ok(b) => Some(b),
            Err(e) => {
                warn!("Balance unavailable ({}), buys refused this loop", e);
                None
            }
        };

        info!(
            "--- [Loop {}] price: {}, upper levels created: {} ---",
            self.loop_count,
            price,
            self.grid.created_count()
        );

        let notifier = self.notifier.as_ref();
        // Both passes draw on the same cash figure
        self.grid.expand(&self.exchange, notifier, price, &mut balance).await;
        self.grid.update_all(&self.exchange, notifier, price, &mut balance).await;

        let config = self.grid.config();
        if self.loop_count % config.report_interval_loops == 0 {
            let digest = self.grid.status_digest(self.loop_count, price);
            self.notifier.send(&digest).await;
            debug!("Status report sent");
        }

        if self.loop_count % config.save_interval_loops == 0 {
            self.store.save(&self.grid.snapshot_records())?;
        }

        Ok(())
    }

    /// Cancel all open orders, write the final snapshot and report.
    ///
    /// Returns the number of cancelled orders.
    pub async fn shutdown(&mut self) -> u32 {
        info!("Shutting down grid bot, cancelling open orders");
        self.notifier
            .send("Grid bot stopping, cancelling open buy/sell orders")
            .await;

        let cancelled = self.grid.cancel_all_open_orders(&self.exchange).await;

        if let Err(e) = self.store.save(&self.grid.snapshot_records()) {
            error!("Failed to write final snapshot: {}", e);
        }

        let end_msg = format!("Grid bot stopped\n - cancelled {} orders", cancelled);
        info!("{}", end_msg.replace('\n', " "));
        self.notifier.send(&end_msg).await;
        cancelled
    }
}
