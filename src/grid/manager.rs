//! Grid manager - owns the level ladder and grows it upward

use log::{error, info, warn};

use super::config::GridConfig;
use super::errors::{GridError, GridResult};
use super::executor::GridExchange;
use super::notifier::Notifier;
use super::snapshot::LevelRecord;
use super::strategy::{LevelParams, Strategy, TickContext};
use super::types::{prices_equal, BalanceSnapshot, FillStatus, LevelStatus, EPSILON};

/// Level ladder plus upward-expansion bookkeeping
pub struct GridManager {
    config: GridConfig,
    params: LevelParams,
    /// Always sorted by ascending id
    levels: Vec<Strategy>,
    /// Levels created above `start_price` so far
    created_count: u32,
    /// Next offset (in buy intervals) above `start_price` to consider
    next_offset: u32,
}

impl GridManager {
    /// Build the initial ladder from config
    pub fn build(config: GridConfig) -> GridResult<Self> {
        config.validate()?;

        let levels = (0..config.level_count)
            .map(|i| {
                let buy = config.level_buy_price(i);
                Strategy::new(i, buy, buy + config.sell_interval, config.quantity)
            })
            .collect::<GridResult<Vec<_>>>()?;

        info!(
            "Built grid of {} levels for {}: buy {} down to {}",
            levels.len(),
            config.asset,
            config.start_price,
            config.lowest_buy_price()
        );

        Ok(Self {
            params: LevelParams::from(&config),
            config,
            levels,
            created_count: 0,
            next_offset: 1,
        })
    }

    /// Rebuild the ladder from snapshot records.
    ///
    /// Every restored order id is checked with the exchange; ids it no
    /// longer knows are dropped (BUYING -> STANDBY, SELLING -> ACTIVE).
    pub async fn restore<E: GridExchange + ?Sized>(
        config: GridConfig,
        records: &[LevelRecord],
        exchange: &E,
    ) -> GridResult<Self> {
        config.validate()?;

        let mut levels = records
            .iter()
            .map(Strategy::from_record)
            .collect::<GridResult<Vec<_>>>()?;
        levels.sort_by_key(|l| l.id());

        if levels.windows(2).any(|w| w[0].id() == w[1].id()) {
            return Err(GridError::StatePersistence(
                "snapshot contains duplicate level ids".into(),
            ));
        }

        for level in levels.iter_mut() {
            let Some(order_id) = level.order_id().map(String::from) else {
                continue;
            };
            match exchange.get_order_status(&config.asset, &order_id).await {
                Ok(FillStatus::NotFound) => {
                    warn!(
                        "[Strategy {}] Restored order {} unknown to exchange, resetting",
                        level.id(),
                        order_id
                    );
                    level.drop_unknown_order();
                }
                Ok(_) => {}
                Err(e) => warn!(
                    "[Strategy {}] Could not verify restored order {}: {}",
                    level.id(),
                    order_id,
                    e
                ),
            }
        }

        // Expansion counters follow from the levels above start_price
        let offsets: Vec<u32> = levels
            .iter()
            .filter(|l| l.buy_price() > config.start_price + EPSILON)
            .map(|l| ((l.buy_price() - config.start_price) / config.buy_interval).round() as u32)
            .collect();
        let created_count = offsets.len() as u32;
        let next_offset = offsets.iter().max().map_or(1, |m| m + 1);

        info!(
            "Restored {} levels ({} open orders, {} above start)",
            levels.len(),
            levels.iter().filter(|l| l.has_open_order()).count(),
            created_count
        );

        Ok(Self {
            params: LevelParams::from(&config),
            config,
            levels,
            created_count,
            next_offset,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn levels(&self) -> &[Strategy] {
        &self.levels
    }

    pub fn created_count(&self) -> u32 {
        self.created_count
    }

    pub fn next_offset(&self) -> u32 {
        self.next_offset
    }

    /// Add levels above `start_price` while the price has broken through
    /// them, up to `max_up_strategies`. Returns the number created.
    ///
    /// Cash committed to new buys is deducted from `balance`.
    pub async fn expand<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        notifier: &dyn Notifier,
        price: f64,
        balance: &mut Option<BalanceSnapshot>,
    ) -> u32 {
        let mut created = 0;

        while self.created_count < self.config.max_up_strategies {
            let target = self.config.upward_buy_price(self.next_offset);
            if price < target {
                break;
            }

            if self.levels.iter().any(|l| prices_equal(l.buy_price(), target)) {
                break;
            }

            // A lower level still working its sell at this price blocks creation
            if self
                .levels
                .iter()
                .any(|l| prices_equal(l.sell_price(), target) && l.status() != LevelStatus::Standby)
            {
                break;
            }

            let id = self.levels.iter().map(|l| l.id() + 1).max().unwrap_or(0);
            let sell = target + self.config.sell_interval;
            let mut level = match Strategy::new(id, target, sell, self.config.quantity) {
                Ok(level) => level,
                Err(e) => {
                    error!("Cannot create level above start: {}", e);
                    break;
                }
            };

            let msg = format!(
                "[Strategy {}] Upper level added: buy={}, sell={}, price={} (offset={})",
                id, target, sell, price, self.next_offset
            );
            info!("{}", msg);
            notifier.send(&msg).await;

            let ctx = TickContext {
                asset: &self.config.asset,
                price,
                balance: *balance,
            };
            match level.place_buy(exchange, notifier, &ctx, &self.params).await {
                Ok(true) => commit_cash(balance, &level, &self.params),
                Ok(false) => {}
                Err(e) => error!("[Strategy {}] Immediate buy failed: {}", id, e),
            }

            self.levels.push(level);
            self.created_count += 1;
            self.next_offset += 1;
            created += 1;
        }

        created
    }

    /// Advance every level once, in ascending id order.
    ///
    /// A fault in one level resets that level and never stops the others.
    /// Each buy placed reduces the cash seen by the levels after it.
    pub async fn update_all<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        notifier: &dyn Notifier,
        price: f64,
        balance: &mut Option<BalanceSnapshot>,
    ) {
        let asset = self.config.asset.as_str();

        for level in self.levels.iter_mut() {
            let ctx = TickContext {
                asset,
                price,
                balance: *balance,
            };
            let before = level.status();

            if let Err(e) = level.update(exchange, notifier, &ctx, &self.params).await {
                level.reset_after_fault(exchange, notifier, asset, &e).await;
            }

            if before == LevelStatus::Standby && level.status() == LevelStatus::Buying {
                commit_cash(balance, level, &self.params);
            }
        }
    }

    /// Cancel every open order; returns how many were cancelled
    pub async fn cancel_all_open_orders<E: GridExchange + ?Sized>(&mut self, exchange: &E) -> u32 {
        let mut cancelled = 0;
        for level in self.levels.iter_mut() {
            match level.cancel_open_order(exchange, &self.config.asset).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => error!("[Strategy {}] Cancel at shutdown failed: {}", level.id(), e),
            }
        }
        info!("Cancelled {} open orders", cancelled);
        cancelled
    }

    /// Human-readable summary of non-STANDBY levels
    pub fn status_digest(&self, loop_count: u64, price: f64) -> String {
        let mut text = format!("Status report (loop {})\n - price: {}\n", loop_count, price);

        let active: Vec<String> = self
            .levels
            .iter()
            .filter(|l| l.status() != LevelStatus::Standby)
            .map(|l| {
                format!(
                    " - ID {}: {}, buy {}, sell {}",
                    l.id(),
                    l.status(),
                    l.buy_price(),
                    l.sell_price()
                )
            })
            .collect();

        if active.is_empty() {
            text.push_str(" - all levels standby");
        } else {
            text.push_str("Active levels:\n");
            text.push_str(&active.join("\n"));
        }
        text
    }

    pub fn snapshot_records(&self) -> Vec<LevelRecord> {
        self.levels.iter().map(Strategy::to_record).collect()
    }
}

/// Deduct a freshly placed buy from the tick's cash figure
fn commit_cash(balance: &mut Option<BalanceSnapshot>, level: &Strategy, params: &LevelParams) {
    if let Some(b) = balance.as_mut() {
        b.available_cash -= params.required_cash(level.buy_price(), level.quantity());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::executor::mock::MockExchange;
    use crate::grid::notifier::mock::RecordingNotifier;
    use crate::grid::types::OrderSide;
    use chrono::Utc;

    fn config() -> GridConfig {
        GridConfig::new("DOGE", 100.0, 5, 20.0)
    }

    fn rich() -> Option<BalanceSnapshot> {
        Some(BalanceSnapshot::new(1_000_000.0, 0.0, 0.0))
    }

    #[test]
    fn test_build_ladder() {
        let grid = GridManager::build(config().with_intervals(1.0, 2.0)).unwrap();
        let buys: Vec<f64> = grid.levels().iter().map(|l| l.buy_price()).collect();
        assert_eq!(buys, vec![100.0, 99.0, 98.0, 97.0, 96.0]);
        assert!(grid.levels().iter().all(|l| l.sell_price() == l.buy_price() + 2.0));
        assert!(grid.levels().iter().all(|l| l.status() == LevelStatus::Standby));
        assert_eq!(grid.next_offset(), 1);
    }

    #[tokio::test]
    async fn test_drop_to_97_buys_four_levels() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid = GridManager::build(config()).unwrap();

        grid.update_all(&exchange, &notifier, 97.0, &mut rich()).await;

        let statuses: Vec<LevelStatus> = grid.levels().iter().map(|l| l.status()).collect();
        assert_eq!(
            statuses,
            vec![
                LevelStatus::Buying,
                LevelStatus::Buying,
                LevelStatus::Buying,
                LevelStatus::Buying,
                LevelStatus::Standby,
            ]
        );
        let prices: Vec<f64> = exchange.placed().await.iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![100.0, 99.0, 98.0, 97.0]);
    }

    #[tokio::test]
    async fn test_expansion_respects_cap() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid =
            GridManager::build(config().with_intervals(1.0, 2.0).with_max_up_strategies(2)).unwrap();

        let created = grid.expand(&exchange, &notifier, 110.0, &mut rich()).await;
        assert_eq!(created, 2);
        assert_eq!(grid.levels().len(), 7);
        assert_eq!(grid.created_count(), 2);

        let top: Vec<(u32, f64, LevelStatus)> = grid.levels()[5..]
            .iter()
            .map(|l| (l.id(), l.buy_price(), l.status()))
            .collect();
        assert_eq!(
            top,
            vec![(5, 101.0, LevelStatus::Buying), (6, 102.0, LevelStatus::Buying)]
        );

        // Cap reached: nothing more, however high the price goes
        assert_eq!(grid.expand(&exchange, &notifier, 200.0, &mut rich()).await, 0);
        assert_eq!(grid.levels().len(), 7);
        assert_eq!(notifier.count_containing("Upper level added").await, 2);
    }

    #[tokio::test]
    async fn test_expansion_waits_below_target() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid = GridManager::build(config()).unwrap();

        assert_eq!(grid.expand(&exchange, &notifier, 100.9, &mut rich()).await, 0);
        assert_eq!(grid.levels().len(), 5);
    }

    #[tokio::test]
    async fn test_expansion_blocked_by_pending_sell_at_target() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        // sell_interval == buy_interval: level 0 sells at 101
        let mut grid = GridManager::build(config()).unwrap();

        grid.update_all(&exchange, &notifier, 100.0, &mut rich()).await;
        assert_eq!(grid.levels()[0].status(), LevelStatus::Buying);

        assert_eq!(grid.expand(&exchange, &notifier, 101.5, &mut rich()).await, 0);

        // Once level 0 is back in STANDBY the level at 101 may be created
        grid.cancel_all_open_orders(&exchange).await;
        assert_eq!(grid.expand(&exchange, &notifier, 101.5, &mut rich()).await, 1);
        assert_eq!(grid.levels()[5].buy_price(), 101.0);
        assert_eq!(grid.levels()[5].id(), 5);
    }

    #[tokio::test]
    async fn test_expansion_without_cash_leaves_standby_level() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid =
            GridManager::build(config().with_intervals(1.0, 2.0).with_max_up_strategies(1)).unwrap();

        let created = grid.expand(&exchange, &notifier, 101.0, &mut None).await;
        assert_eq!(created, 1);
        assert_eq!(grid.levels()[5].status(), LevelStatus::Standby);
        assert!(exchange.placed().await.is_empty());
    }

    #[tokio::test]
    async fn test_level_fault_is_contained() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid = GridManager::build(config()).unwrap();

        grid.update_all(&exchange, &notifier, 99.0, &mut rich()).await;
        // Level 0 bought at 100 (order-1), level 1 at 99 (order-2)
        exchange.set_status("order-1", FillStatus::NotFound).await;
        exchange.fill_completely("order-2").await;

        grid.update_all(&exchange, &notifier, 99.0, &mut rich()).await;
        assert_eq!(grid.levels()[0].status(), LevelStatus::Standby);
        assert_eq!(grid.levels()[1].status(), LevelStatus::Selling);
        assert_eq!(notifier.count_containing("Fault").await, 1);
    }

    #[tokio::test]
    async fn test_cancel_all_reverts_states() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid = GridManager::build(config()).unwrap();

        grid.update_all(&exchange, &notifier, 99.0, &mut rich()).await;
        exchange.fill_completely("order-1").await;
        grid.update_all(&exchange, &notifier, 99.0, &mut rich()).await;
        assert_eq!(grid.levels()[0].status(), LevelStatus::Selling);
        assert_eq!(grid.levels()[1].status(), LevelStatus::Buying);

        let cancelled = grid.cancel_all_open_orders(&exchange).await;
        assert_eq!(cancelled, 2);
        assert_eq!(grid.levels()[0].status(), LevelStatus::Active);
        assert_eq!(grid.levels()[1].status(), LevelStatus::Standby);
        assert!(grid.levels().iter().all(|l| !l.has_open_order()));
    }

    #[tokio::test]
    async fn test_buys_in_one_tick_share_the_cash() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid = GridManager::build(config()).unwrap();

        // Enough for the 100 and 99 levels only
        let cash = 100.0 * 20.0 * 1.001 + 99.0 * 20.0 * 1.001 + 1.0;
        let mut balance = Some(BalanceSnapshot::new(cash, 0.0, 0.0));
        grid.update_all(&exchange, &notifier, 97.0, &mut balance).await;

        let statuses: Vec<LevelStatus> = grid.levels().iter().map(|l| l.status()).collect();
        assert_eq!(
            statuses,
            vec![
                LevelStatus::Buying,
                LevelStatus::Buying,
                LevelStatus::Standby,
                LevelStatus::Standby,
                LevelStatus::Standby,
            ]
        );
        assert_eq!(exchange.placed().await.len(), 2);
        assert_eq!(notifier.count_containing("insufficient cash").await, 2);
        assert!((balance.unwrap().available_cash - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_expansion_draws_down_tick_cash() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid =
            GridManager::build(config().with_intervals(1.0, 2.0).with_max_up_strategies(3)).unwrap();

        // One upper buy fits, the second is refused
        let mut balance = Some(BalanceSnapshot::new(101.0 * 20.0 * 1.001 + 1.0, 0.0, 0.0));
        assert_eq!(grid.expand(&exchange, &notifier, 102.0, &mut balance).await, 2);

        assert_eq!(grid.levels()[5].status(), LevelStatus::Buying);
        assert_eq!(grid.levels()[6].status(), LevelStatus::Standby);
        assert_eq!(exchange.placed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_cancel_keeps_order() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid = GridManager::build(config()).unwrap();

        grid.update_all(&exchange, &notifier, 100.0, &mut rich()).await;
        exchange.set_should_fail_cancel(true).await;

        assert_eq!(grid.cancel_all_open_orders(&exchange).await, 0);
        assert_eq!(grid.levels()[0].status(), LevelStatus::Buying);
        assert_eq!(grid.levels()[0].order_id(), Some("order-1"));
    }

    #[tokio::test]
    async fn test_repeated_expansion_keeps_buy_prices_unique() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid = GridManager::build(config().with_intervals(1.0, 2.0)).unwrap();

        grid.expand(&exchange, &notifier, 101.5, &mut rich()).await;
        grid.expand(&exchange, &notifier, 101.5, &mut rich()).await;

        let mut buys: Vec<f64> = grid.levels().iter().map(|l| l.buy_price()).collect();
        let total = buys.len();
        buys.sort_by(|a, b| a.total_cmp(b));
        buys.dedup_by(|a, b| prices_equal(*a, *b));
        assert_eq!(buys.len(), total);
        assert_eq!(grid.created_count(), 1);
    }

    #[tokio::test]
    async fn test_status_digest() {
        let exchange = MockExchange::funded();
        let notifier = RecordingNotifier::new();
        let mut grid = GridManager::build(config()).unwrap();

        let idle = grid.status_digest(300, 105.0);
        assert!(idle.contains("loop 300"));
        assert!(idle.contains("all levels standby"));

        grid.update_all(&exchange, &notifier, 100.0, &mut rich()).await;
        let busy = grid.status_digest(600, 100.0);
        assert!(busy.contains("ID 0: BUYING, buy 100, sell 101"));
        assert!(!busy.contains("ID 1"));
    }

    #[tokio::test]
    async fn test_restore_validates_orders_and_counters() {
        let exchange = MockExchange::funded();
        let known = exchange
            .place_limit_order("DOGE", OrderSide::Sell, 103.0, 20.0)
            .await
            .unwrap();

        let record = |id: u32, buy: f64, status: LevelStatus, order_id: Option<&str>| LevelRecord {
            id,
            buy_price: buy,
            sell_price: buy + 1.0,
            qty: 20.0,
            status,
            order_id: order_id.map(String::from),
            last_action_time: Utc::now(),
        };
        let records = vec![
            record(6, 102.0, LevelStatus::Selling, Some(&known.order_id)),
            record(0, 100.0, LevelStatus::Buying, Some("gone")),
            record(5, 101.0, LevelStatus::Selling, Some("also-gone")),
            record(1, 99.0, LevelStatus::Standby, None),
        ];

        let grid = GridManager::restore(config(), &records, &exchange).await.unwrap();

        let ids: Vec<u32> = grid.levels().iter().map(|l| l.id()).collect();
        assert_eq!(ids, vec![0, 1, 5, 6]);
        assert_eq!(grid.levels()[0].status(), LevelStatus::Standby);
        assert_eq!(grid.levels()[2].status(), LevelStatus::Active);
        assert_eq!(grid.levels()[3].status(), LevelStatus::Selling);
        assert_eq!(grid.created_count(), 2);
        assert_eq!(grid.next_offset(), 3);
    }

    #[tokio::test]
    async fn test_restore_rejects_duplicate_ids() {
        let exchange = MockExchange::funded();
        let grid = GridManager::build(config()).unwrap();
        let mut records = grid.snapshot_records();
        records.push(records[0].clone());

        assert!(GridManager::restore(config(), &records, &exchange).await.is_err());
    }
}
