//! Single-position bracket trader
//!
//! Holds one position and keeps at most one open sell (take-profit) and one
//! open buy (averaging-down) around it. Every fill re-brackets the position
//! from the exchange-reported average cost. Once the position is fully sold
//! the trader stops for good.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::errors::{GridError, GridResult};
use super::executor::{GridExchange, PriceFeed};
use super::notifier::Notifier;
use super::snapshot::save_json_atomic;
use super::ticks::{ShutdownSignal, TickSource};
use super::types::{round_qty, round_to_tick, BalanceSnapshot, FillStatus, OrderSide, OrderState};

/// Bracket trader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketConfig {
    pub asset: String,

    /// Capital the order sizes are computed from
    pub initial_capital: f64,

    /// Fraction of capital used by the entry buy
    #[serde(default = "default_initial_buy_ratio")]
    pub initial_buy_ratio: f64,

    /// Entry limit price; the current price when absent
    #[serde(default)]
    pub initial_buy_price: Option<f64>,

    /// Re-entry floor as a fraction below the entry price (negative)
    #[serde(default = "default_buy_floor_drop")]
    pub buy_floor_drop: f64,

    #[serde(default = "default_profit_target")]
    pub profit_target: f64,

    /// Protective buy offset from the average cost (negative)
    #[serde(default = "default_loss_limit")]
    pub loss_limit: f64,

    /// Fraction of capital per bracket order
    #[serde(default = "default_order_ratio")]
    pub order_ratio: f64,

    #[serde(default = "default_max_consecutive_buys")]
    pub max_consecutive_buys: u32,

    /// No protective buy at or below this much cash
    #[serde(default = "default_min_cash")]
    pub min_cash: f64,

    #[serde(default = "default_price_tick")]
    pub price_tick: f64,

    #[serde(default = "default_qty_decimals")]
    pub qty_decimals: u32,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

fn default_initial_buy_ratio() -> f64 {
    0.4
}

fn default_buy_floor_drop() -> f64 {
    -0.10
}

fn default_profit_target() -> f64 {
    0.01
}

fn default_loss_limit() -> f64 {
    -0.01
}

fn default_order_ratio() -> f64 {
    0.1
}

fn default_max_consecutive_buys() -> u32 {
    5
}

fn default_min_cash() -> f64 {
    5000.0
}

fn default_price_tick() -> f64 {
    1.0
}

fn default_qty_decimals() -> u32 {
    6
}

fn default_poll_interval() -> u64 {
    5
}

fn default_error_backoff() -> u64 {
    60
}

fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}

impl BracketConfig {
    pub fn new(asset: impl Into<String>, initial_capital: f64) -> Self {
        Self {
            asset: asset.into(),
            initial_capital,
            initial_buy_ratio: default_initial_buy_ratio(),
            initial_buy_price: None,
            buy_floor_drop: default_buy_floor_drop(),
            profit_target: default_profit_target(),
            loss_limit: default_loss_limit(),
            order_ratio: default_order_ratio(),
            max_consecutive_buys: default_max_consecutive_buys(),
            min_cash: default_min_cash(),
            price_tick: default_price_tick(),
            qty_decimals: default_qty_decimals(),
            poll_interval_secs: default_poll_interval(),
            error_backoff_secs: default_error_backoff(),
            state_file: default_state_file(),
        }
    }

    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = path.into();
        self
    }

    pub fn with_entry_price(mut self, price: f64) -> Self {
        self.initial_buy_price = Some(price);
        self
    }

    pub fn with_max_consecutive_buys(mut self, max: u32) -> Self {
        self.max_consecutive_buys = max;
        self
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.asset.is_empty() {
            return Err(GridError::InvalidConfig("asset cannot be empty".into()));
        }
        if self.initial_capital <= 0.0 {
            return Err(GridError::InvalidConfig("initial_capital must be positive".into()));
        }
        if !(self.initial_buy_ratio > 0.0 && self.initial_buy_ratio <= 1.0) {
            return Err(GridError::InvalidConfig("initial_buy_ratio must be in (0, 1]".into()));
        }
        if !(self.order_ratio > 0.0 && self.order_ratio <= 1.0) {
            return Err(GridError::InvalidConfig("order_ratio must be in (0, 1]".into()));
        }
        if self.profit_target <= 0.0 {
            return Err(GridError::InvalidConfig("profit_target must be positive".into()));
        }
        if !(self.loss_limit < 0.0 && self.loss_limit > -1.0) {
            return Err(GridError::InvalidConfig("loss_limit must be in (-1, 0)".into()));
        }
        if !(self.buy_floor_drop <= 0.0 && self.buy_floor_drop > -1.0) {
            return Err(GridError::InvalidConfig("buy_floor_drop must be in (-1, 0]".into()));
        }
        if self.price_tick <= 0.0 {
            return Err(GridError::InvalidConfig("price_tick must be positive".into()));
        }
        if let Some(p) = self.initial_buy_price {
            if p <= 0.0 {
                return Err(GridError::InvalidConfig("initial_buy_price must be positive".into()));
            }
        }
        Ok(())
    }
}

/// Lifecycle of the bracket trader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BracketPhase {
    /// Entry buy placed (or about to be), waiting for its full fill
    #[default]
    AwaitingEntry,
    Running,
    /// Position fully sold; terminal
    Flattened,
}

/// Persisted bracket state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BracketState {
    pub phase: BracketPhase,
    pub sell_id: Option<String>,
    pub sell_price: Option<f64>,
    pub sell_qty: Option<f64>,
    pub buy_id: Option<String>,
    pub buy_price: Option<f64>,
    pub buy_qty: Option<f64>,
    pub buy_floor: Option<f64>,
    pub consecutive_buys: u32,
}

impl BracketState {
    pub fn load_from_file(path: impl AsRef<Path>) -> GridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to_file_atomic(&self, path: impl AsRef<Path>) -> GridResult<()> {
        save_json_atomic(path.as_ref(), self)
    }
}

/// Result of polling one open order
enum Poll {
    Pending,
    Filled(f64),
    Gone,
}

pub struct BracketTrader<E: GridExchange, P: PriceFeed, T: TickSource> {
    config: BracketConfig,
    state: BracketState,
    exchange: E,
    price_feed: P,
    ticks: T,
    notifier: Arc<dyn Notifier>,
}

impl<E: GridExchange, P: PriceFeed, T: TickSource> BracketTrader<E, P, T> {
    /// Create a trader, reloading state from `config.state_file` if present
    pub fn new(
        config: BracketConfig,
        exchange: E,
        price_feed: P,
        ticks: T,
        notifier: Arc<dyn Notifier>,
    ) -> GridResult<Self> {
        config.validate()?;

        let state = if config.state_file.exists() {
            match BracketState::load_from_file(&config.state_file) {
                Ok(state) => {
                    info!("Loaded bracket state from {:?}: {:?}", config.state_file, state.phase);
                    state
                }
                Err(e) => {
                    error!("Failed to load bracket state: {}, starting fresh", e);
                    BracketState::default()
                }
            }
        } else {
            BracketState::default()
        };

        Ok(Self {
            config,
            state,
            exchange,
            price_feed,
            ticks,
            notifier,
        })
    }

    pub fn state(&self) -> &BracketState {
        &self.state
    }

    pub fn config(&self) -> &BracketConfig {
        &self.config
    }

    fn persist(&self) {
        if let Err(e) = self.state.save_to_file_atomic(&self.config.state_file) {
            error!("Failed to save bracket state: {}", e);
        }
    }

    async fn alert(&self, msg: &str) {
        info!("{}", msg);
        self.notifier.send(msg).await;
    }

    /// Place the entry buy unless a restored position already exists
    pub async fn start(&mut self) -> GridResult<()> {
        self.alert(&format!("Bracket trader started: {}", self.config.asset))
            .await;

        match self.state.phase {
            BracketPhase::Flattened => {
                warn!("Position already flattened, nothing to do");
                return Ok(());
            }
            BracketPhase::AwaitingEntry if self.state.buy_id.is_some() => {
                info!("Entry buy {:?} still pending", self.state.buy_id);
                return Ok(());
            }
            _ => {}
        }

        let balance = self.exchange.get_balance(&self.config.asset).await?;
        if self.state.buy_floor.is_some() && balance.available_asset > 0.0 {
            info!(
                "Restored position of {} {}, skipping entry",
                balance.available_asset, self.config.asset
            );
            self.state.phase = BracketPhase::Running;
            self.persist();
            return Ok(());
        }

        self.enter(balance.available_cash).await
    }

    async fn enter(&mut self, cash: f64) -> GridResult<()> {
        let price = match self.config.initial_buy_price {
            Some(p) => p,
            None => self.price_feed.current_price(&self.config.asset).await?,
        };
        let amount = cash.min(self.config.initial_capital) * self.config.initial_buy_ratio;
        let qty = round_qty(amount / price, self.config.qty_decimals);
        if qty <= 0.0 {
            return Err(GridError::InsufficientBalance {
                required: price,
                available: cash,
            });
        }

        let order = self
            .exchange
            .place_limit_order(&self.config.asset, OrderSide::Buy, price, qty)
            .await?;

        self.state.phase = BracketPhase::AwaitingEntry;
        self.state.buy_id = Some(order.order_id.clone());
        self.state.buy_price = Some(price);
        self.state.buy_qty = Some(qty);
        self.state.buy_floor = Some(price * (1.0 + self.config.buy_floor_drop));
        self.persist();

        self.alert(&format!(
            "Entry buy placed: id={}, price={}, qty={}",
            order.order_id, price, qty
        ))
        .await;
        Ok(())
    }

    /// Poll open orders once and re-bracket on fills
    pub async fn tick(&mut self) -> GridResult<()> {
        if self.state.phase == BracketPhase::Flattened {
            return Ok(());
        }

        if self.state.phase == BracketPhase::AwaitingEntry && self.state.buy_id.is_none() {
            let balance = self.exchange.get_balance(&self.config.asset).await?;
            return self.enter(balance.available_cash).await;
        }

        if let Some(id) = self.state.sell_id.clone() {
            match self.poll(&id).await? {
                Poll::Filled(qty) => {
                    self.alert(&format!(
                        "Sold: id={}, price={:?}, qty={}",
                        id, self.state.sell_price, qty
                    ))
                    .await;
                    self.state.sell_id = None;
                    self.state.consecutive_buys = 0;
                    self.persist();
                    self.place_brackets(OrderSide::Sell).await?;
                }
                Poll::Gone => {
                    warn!("Sell {} no longer open, clearing", id);
                    self.state.sell_id = None;
                    self.persist();
                }
                Poll::Pending => {}
            }
        }

        if self.state.phase == BracketPhase::Flattened {
            return Ok(());
        }

        if let Some(id) = self.state.buy_id.clone() {
            match self.poll(&id).await? {
                Poll::Filled(qty) => {
                    if self.state.phase == BracketPhase::AwaitingEntry {
                        info!("Entry filled, bracketing position");
                        self.state.phase = BracketPhase::Running;
                    }
                    self.alert(&format!(
                        "Bought: id={}, price={:?}, qty={}",
                        id, self.state.buy_price, qty
                    ))
                    .await;
                    self.state.buy_id = None;
                    self.state.consecutive_buys += 1;
                    self.persist();
                    self.place_brackets(OrderSide::Buy).await?;
                }
                Poll::Gone => {
                    warn!("Buy {} no longer open, clearing", id);
                    self.state.buy_id = None;
                    self.persist();
                }
                Poll::Pending => {}
            }
        } else {
            debug!("No open buy");
        }

        // A held position always carries a sell
        if self.state.phase == BracketPhase::Running && self.state.sell_id.is_none() {
            self.restore_brackets().await?;
        }

        Ok(())
    }

    async fn poll(&self, order_id: &str) -> GridResult<Poll> {
        let status = match self.exchange.get_order_status(&self.config.asset, order_id).await {
            Ok(status) => status,
            Err(e) if e.is_transient() => {
                warn!("Fill query for {} failed: {}", order_id, e);
                return Ok(Poll::Pending);
            }
            Err(e) => return Err(e),
        };

        Ok(match status {
            FillStatus::NoData => Poll::Pending,
            FillStatus::NotFound => Poll::Gone,
            FillStatus::Report(report) => {
                report.validate().map_err(GridError::MalformedResponse)?;
                if report.is_fully_filled(1e-9) {
                    Poll::Filled(report.filled_qty())
                } else if report.state == OrderState::Cancelled {
                    Poll::Gone
                } else {
                    if report.filled_qty() > 0.0 {
                        info!(
                            "Order {} partially filled: {} of {}",
                            order_id,
                            report.filled_qty(),
                            report.ordered_qty
                        );
                    }
                    Poll::Pending
                }
            }
        })
    }

    async fn cancel_open(&mut self) {
        for (side, id) in [
            (OrderSide::Sell, self.state.sell_id.take()),
            (OrderSide::Buy, self.state.buy_id.take()),
        ] {
            if let Some(id) = id {
                info!("Cancel {}: {}", side, id);
                if let Err(e) = self.exchange.cancel_order(&self.config.asset, &id).await {
                    error!("Cancel of {} failed: {}", id, e);
                }
            }
        }
    }

    /// Replace both brackets after a fill on `filled`
    async fn place_brackets(&mut self, filled: OrderSide) -> GridResult<()> {
        self.cancel_open().await;

        let balance = self.exchange.get_balance(&self.config.asset).await?;
        if self.flatten_if_empty(&balance).await {
            return Ok(());
        }

        let last_buy = self.state.buy_price;
        let avg_cost = self.cost_basis(&balance);
        let sell_basis = match filled {
            OrderSide::Buy => avg_cost,
            OrderSide::Sell => self.state.sell_price.unwrap_or(avg_cost),
        };
        self.place_sell(sell_basis, balance.available_asset).await;

        // Never chase above the price just bought at
        let cap = match filled {
            OrderSide::Buy => last_buy,
            OrderSide::Sell => None,
        };
        self.maybe_protective_buy(avg_cost, cap, balance.available_cash)
            .await;

        self.persist();
        Ok(())
    }

    /// Re-place the missing sell (and buy, if absent) for a held position,
    /// e.g. after a restart or a sell cancelled outside the trader.
    async fn restore_brackets(&mut self) -> GridResult<()> {
        let balance = self.exchange.get_balance(&self.config.asset).await?;
        if self.flatten_if_empty(&balance).await {
            return Ok(());
        }

        let avg_cost = self.cost_basis(&balance);
        info!(
            "Re-bracketing position of {} {} at avg cost {}",
            balance.available_asset, self.config.asset, avg_cost
        );
        self.place_sell(avg_cost, balance.available_asset).await;

        if self.state.buy_id.is_none() {
            self.maybe_protective_buy(avg_cost, None, balance.available_cash)
                .await;
        }

        self.persist();
        Ok(())
    }

    /// Enter the terminal state when nothing is left to sell
    async fn flatten_if_empty(&mut self, balance: &BalanceSnapshot) -> bool {
        if balance.available_asset > 0.0 {
            return false;
        }
        self.state.phase = BracketPhase::Flattened;
        self.persist();
        self.alert("Position fully sold, bracket trader stopped").await;
        true
    }

    /// Exchange average cost, or the last local buy price before one exists
    fn cost_basis(&self, balance: &BalanceSnapshot) -> f64 {
        if balance.avg_cost > 0.0 {
            balance.avg_cost
        } else {
            self.state.buy_price.unwrap_or(0.0)
        }
    }

    async fn place_sell(&mut self, basis: f64, held: f64) {
        let order_amount = self.config.initial_capital * self.config.order_ratio;
        let sell = round_to_tick(basis * (1.0 + self.config.profit_target), self.config.price_tick);
        let sell_qty = round_qty(order_amount / sell, self.config.qty_decimals).min(held);

        match self
            .exchange
            .place_limit_order(&self.config.asset, OrderSide::Sell, sell, sell_qty)
            .await
        {
            Ok(order) => {
                self.alert(&format!(
                    "New sell: id={}, price={}, qty={}",
                    order.order_id, sell, sell_qty
                ))
                .await;
                self.state.sell_id = Some(order.order_id);
                self.state.sell_price = Some(sell);
                self.state.sell_qty = Some(sell_qty);
            }
            // Retried on the next tick
            Err(e) => error!("Sell placement failed: {}", e),
        }
    }

    async fn maybe_protective_buy(&mut self, avg_cost: f64, cap: Option<f64>, cash: f64) {
        if self.state.consecutive_buys >= self.config.max_consecutive_buys {
            self.alert(&format!(
                "Max consecutive buys reached ({}), no new buy",
                self.state.consecutive_buys
            ))
            .await;
        } else if cash <= self.config.min_cash {
            self.alert(&format!("Cash {:.2} is insufficient, no new buy", cash))
                .await;
        } else {
            self.place_protective_buy(avg_cost, cap, cash).await;
        }
    }

    async fn place_protective_buy(&mut self, avg_cost: f64, cap: Option<f64>, cash: f64) {
        let tick = self.config.price_tick;
        let mut buy = round_to_tick(avg_cost * (1.0 + self.config.loss_limit), tick);

        if let Some(last) = cap {
            if buy >= last {
                buy = round_to_tick(last - tick, tick);
            }
        }

        if buy <= 0.0 {
            warn!("Protective buy price {} not positive, skipping", buy);
            return;
        }

        if let Some(floor) = self.state.buy_floor {
            if buy < floor {
                info!("Protective buy {} below floor {}, skipping", buy, floor);
                return;
            }
        }

        let order_amount = self.config.initial_capital * self.config.order_ratio;
        let decimals = self.config.qty_decimals;
        let qty = round_qty(order_amount / buy, decimals).min(round_qty(cash / buy, decimals));

        match self
            .exchange
            .place_limit_order(&self.config.asset, OrderSide::Buy, buy, qty)
            .await
        {
            Ok(order) => {
                self.alert(&format!(
                    "New buy: id={}, price={}, qty={}",
                    order.order_id, buy, qty
                ))
                .await;
                self.state.buy_id = Some(order.order_id);
                self.state.buy_price = Some(buy);
                self.state.buy_qty = Some(qty);
            }
            Err(e) => error!("Buy placement failed: {}", e),
        }
    }

    /// Cancel both brackets and persist
    pub async fn shutdown(&mut self) {
        self.alert("Bracket trader stopping").await;
        self.cancel_open().await;
        self.persist();
    }

    /// Poll until flattened or `shutdown` trips
    pub async fn run(&mut self, shutdown: &ShutdownSignal) -> GridResult<()> {
        let poll = Duration::from_secs(self.config.poll_interval_secs);
        let backoff = Duration::from_secs(self.config.error_backoff_secs);

        if let Err(e) = self.start().await {
            error!("CRITICAL: bracket entry failed: {}", e);
            self.notifier
                .send(&format!("Critical error at entry: {}", e))
                .await;
        }

        while !shutdown.is_triggered() && self.state.phase != BracketPhase::Flattened {
            match self.tick().await {
                Ok(()) => self.ticks.sleep(poll).await,
                Err(e) => {
                    error!("CRITICAL: unexpected error in bracket loop: {}", e);
                    self.notifier
                        .send(&format!("Critical error in bracket loop: {}", e))
                        .await;
                    self.ticks.sleep(backoff).await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::executor::mock::{MockExchange, MockPriceFeed};
    use crate::grid::notifier::mock::RecordingNotifier;
    use crate::grid::ticks::mock::ManualTicks;
    use crate::grid::types::BalanceSnapshot;

    type Trader = BracketTrader<MockExchange, MockPriceFeed, ManualTicks>;

    fn trader(dir: &tempfile::TempDir, config: BracketConfig, notifier: &RecordingNotifier) -> Trader {
        let config = config.with_state_file(dir.path().join("state.json"));
        BracketTrader::new(
            config,
            MockExchange::new(BalanceSnapshot::new(2_000_000.0, 0.0, 0.0)),
            MockPriceFeed::new(100.0),
            ManualTicks::new(1, ShutdownSignal::new()),
            Arc::new(notifier.clone()),
        )
        .unwrap()
    }

    /// Start, then fill the entry with the given average cost
    async fn entered(trader: &mut Trader, avg_cost: f64) {
        trader.start().await.unwrap();
        trader.exchange.fill_completely("order-1").await;
        trader
            .exchange
            .set_balance(BalanceSnapshot::new(1_600_000.0, 4000.0, avg_cost))
            .await;
        trader.tick().await.unwrap();
    }

    #[tokio::test]
    async fn test_entry_sizing_and_floor() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut trader = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);

        trader.start().await.unwrap();

        let placed = trader.exchange.placed().await;
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].price, 100.0);
        assert_eq!(placed[0].qty, 4000.0);
        assert_eq!(trader.state().phase, BracketPhase::AwaitingEntry);
        assert!((trader.state().buy_floor.unwrap() - 90.0).abs() < 1e-9);

        // Still pending: nothing else happens
        trader.tick().await.unwrap();
        assert_eq!(trader.exchange.placed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_configured_entry_price_overrides_feed() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let config = BracketConfig::new("XRP", 1_000_000.0).with_entry_price(80.0);
        let mut trader = trader(&dir, config, &notifier);

        trader.start().await.unwrap();

        let placed = trader.exchange.placed().await;
        assert_eq!(placed[0].price, 80.0);
        assert_eq!(placed[0].qty, 5000.0);
        assert!((trader.state().buy_floor.unwrap() - 72.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_entry_fill_places_both_brackets() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut trader = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);

        entered(&mut trader, 100.4).await;

        assert_eq!(trader.state().phase, BracketPhase::Running);
        assert_eq!(trader.state().consecutive_buys, 1);

        let sells = trader.exchange.placed_on(OrderSide::Sell).await;
        assert_eq!(sells[0].price, 101.0);
        assert_eq!(sells[0].qty, round_qty(100_000.0 / 101.0, 6));

        let buys = trader.exchange.placed_on(OrderSide::Buy).await;
        assert_eq!(buys.len(), 2);
        // round(100.4 * 0.99) = 99
        assert_eq!(buys[1].price, 99.0);
        assert_eq!(trader.state().buy_id.as_deref(), Some("order-3"));
    }

    #[tokio::test]
    async fn test_protective_buy_capped_below_last_fill() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut trader = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);

        // Exchange average well above the entry price
        entered(&mut trader, 110.0).await;

        let buys = trader.exchange.placed_on(OrderSide::Buy).await;
        assert_eq!(buys[1].price, 99.0);
        let sells = trader.exchange.placed_on(OrderSide::Sell).await;
        assert_eq!(sells[0].price, 111.0);
    }

    #[tokio::test]
    async fn test_buy_fill_cancels_sell_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let config = BracketConfig::new("XRP", 1_000_000.0).with_max_consecutive_buys(2);
        let mut trader = trader(&dir, config, &notifier);

        entered(&mut trader, 100.0).await;
        // order-2 sell, order-3 buy at 99
        trader.exchange.fill_completely("order-3").await;
        trader
            .exchange
            .set_balance(BalanceSnapshot::new(1_500_000.0, 5010.0, 99.8))
            .await;
        trader.tick().await.unwrap();

        assert_eq!(trader.state().consecutive_buys, 2);
        assert_eq!(trader.exchange.cancelled().await, vec!["order-2".to_string()]);
        // New sell only; the cap blocks another buy
        assert_eq!(trader.state().sell_id.as_deref(), Some("order-4"));
        assert_eq!(trader.state().buy_id, None);
        assert_eq!(notifier.count_containing("Max consecutive buys").await, 1);
    }

    #[tokio::test]
    async fn test_sell_fill_resets_counter_and_uses_sell_basis() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut trader = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);

        entered(&mut trader, 100.0).await;
        trader.exchange.fill_completely("order-2").await;
        trader
            .exchange
            .set_balance(BalanceSnapshot::new(1_700_000.0, 3010.0, 100.0))
            .await;
        trader.tick().await.unwrap();

        assert_eq!(trader.state().consecutive_buys, 0);
        assert_eq!(trader.exchange.cancelled().await, vec!["order-3".to_string()]);
        let sells = trader.exchange.placed_on(OrderSide::Sell).await;
        // round(101 * 1.01) = 102
        assert_eq!(sells.last().unwrap().price, 102.0);
        assert_eq!(trader.state().sell_price, Some(102.0));
    }

    #[tokio::test]
    async fn test_floor_blocks_deep_reentry() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut trader = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);

        // round(85 * 0.99) = 84 < floor 90
        entered(&mut trader, 85.0).await;

        assert_eq!(trader.exchange.placed_on(OrderSide::Buy).await.len(), 1);
        assert!(trader.state().sell_id.is_some());
        assert_eq!(trader.state().buy_id, None);
    }

    #[tokio::test]
    async fn test_low_cash_blocks_buy() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut trader = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);

        trader.start().await.unwrap();
        trader.exchange.fill_completely("order-1").await;
        trader
            .exchange
            .set_balance(BalanceSnapshot::new(5000.0, 4000.0, 100.0))
            .await;
        trader.tick().await.unwrap();

        assert_eq!(trader.state().buy_id, None);
        assert_eq!(notifier.count_containing("insufficient").await, 1);
    }

    #[tokio::test]
    async fn test_flattened_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut trader = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);

        entered(&mut trader, 100.0).await;
        trader.exchange.fill_completely("order-2").await;
        trader
            .exchange
            .set_balance(BalanceSnapshot::new(2_000_000.0, 0.0, 0.0))
            .await;
        trader.tick().await.unwrap();

        assert_eq!(trader.state().phase, BracketPhase::Flattened);
        assert_eq!(trader.state().sell_id, None);
        assert_eq!(trader.state().buy_id, None);

        let placed = trader.exchange.placed().await.len();
        trader.tick().await.unwrap();
        assert_eq!(trader.exchange.placed().await.len(), placed);

        // run exits immediately
        let shutdown = ShutdownSignal::new();
        trader.run(&shutdown).await.unwrap();
        assert!(trader.ticks.sleeps.is_empty());
    }

    #[tokio::test]
    async fn test_state_persists_and_skips_entry_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut first = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);
        entered(&mut first, 100.0).await;
        let saved = first.state().clone();

        let mut second = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);
        assert_eq!(second.state().phase, saved.phase);
        assert_eq!(second.state().sell_id, saved.sell_id);
        assert_eq!(second.state().buy_id, saved.buy_id);
        assert_eq!(second.state().buy_floor, saved.buy_floor);
        assert_eq!(second.state().consecutive_buys, 1);

        second
            .exchange
            .set_balance(BalanceSnapshot::new(1_600_000.0, 4000.0, 100.0))
            .await;
        second.start().await.unwrap();
        assert!(second.exchange.placed().await.is_empty());
        assert_eq!(second.state().phase, BracketPhase::Running);
    }

    #[tokio::test]
    async fn test_restart_after_shutdown_rebrackets_position() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut first = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);
        entered(&mut first, 100.4).await;
        first.shutdown().await;

        let mut second = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);
        second
            .exchange
            .set_balance(BalanceSnapshot::new(1_600_000.0, 4000.0, 100.4))
            .await;
        second.start().await.unwrap();
        assert!(second.exchange.placed().await.is_empty());

        second.tick().await.unwrap();

        let sells = second.exchange.placed_on(OrderSide::Sell).await;
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].price, 101.0);
        let buys = second.exchange.placed_on(OrderSide::Buy).await;
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].price, 99.0);

        assert_eq!(second.state().phase, BracketPhase::Running);
        assert_eq!(second.state().sell_id.as_deref(), Some("order-1"));
        assert_eq!(second.state().buy_id.as_deref(), Some("order-2"));
    }

    #[tokio::test]
    async fn test_externally_cancelled_sell_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut trader = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);

        // Protective buy lands below the floor, so only the sell rests
        entered(&mut trader, 85.0).await;
        assert_eq!(trader.state().sell_id.as_deref(), Some("order-2"));
        assert_eq!(trader.state().buy_id, None);

        trader
            .exchange
            .fill("order-2", vec![], OrderState::Cancelled)
            .await;
        trader.tick().await.unwrap();

        let sells = trader.exchange.placed_on(OrderSide::Sell).await;
        assert_eq!(sells.len(), 2);
        assert_eq!(sells[1].price, 86.0);
        assert_eq!(trader.state().sell_id.as_deref(), Some("order-3"));
        assert_eq!(trader.state().phase, BracketPhase::Running);
        assert_eq!(trader.exchange.placed_on(OrderSide::Buy).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_sell_placement_retried_next_tick() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut trader = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);

        trader.start().await.unwrap();
        trader.exchange.fill_completely("order-1").await;
        trader
            .exchange
            .set_balance(BalanceSnapshot::new(1_600_000.0, 4000.0, 85.0))
            .await;
        trader.exchange.set_should_fail_place(true).await;
        trader.tick().await.unwrap();
        assert_eq!(trader.state().sell_id, None);

        trader.exchange.set_should_fail_place(false).await;
        trader.tick().await.unwrap();
        assert!(trader.state().sell_id.is_some());
        assert_eq!(trader.exchange.placed_on(OrderSide::Sell).await.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_both_orders() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::new();
        let mut trader = trader(&dir, BracketConfig::new("XRP", 1_000_000.0), &notifier);

        entered(&mut trader, 100.0).await;
        trader.shutdown().await;

        let mut cancelled = trader.exchange.cancelled().await;
        cancelled.sort();
        assert_eq!(cancelled, vec!["order-2".to_string(), "order-3".to_string()]);

        let reloaded = BracketState::load_from_file(dir.path().join("state.json")).unwrap();
        assert_eq!(reloaded.sell_id, None);
        assert_eq!(reloaded.buy_id, None);
    }

    #[test]
    fn test_config_validation() {
        assert!(BracketConfig::new("XRP", 1_000_000.0).validate().is_ok());
        assert!(BracketConfig::new("XRP", 0.0).validate().is_err());

        let mut bad = BracketConfig::new("XRP", 1_000_000.0);
        bad.loss_limit = 0.01;
        assert!(bad.validate().is_err());
    }
}
