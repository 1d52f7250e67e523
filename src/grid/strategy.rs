//! Per-level order lifecycle
//!
//! A [`Strategy`] is one buy/sell price pair of the grid. It cycles
//! `STANDBY -> BUYING -> ACTIVE -> SELLING -> STANDBY` independently of
//! every other level, driven once per tick by [`Strategy::update`].

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use super::config::GridConfig;
use super::errors::{GridError, GridResult};
use super::executor::GridExchange;
use super::notifier::Notifier;
use super::snapshot::LevelRecord;
use super::types::{BalanceSnapshot, FillReport, FillStatus, LevelStatus, OrderSide, OrderState};

/// Read-only market view shared by every level during one tick
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub asset: &'a str,
    pub price: f64,
    /// `None` when the balance query failed this tick; buys are refused
    pub balance: Option<BalanceSnapshot>,
}

/// Trigger parameters derived from [`GridConfig`]
#[derive(Debug, Clone, Copy)]
pub struct LevelParams {
    pub buy_margin: f64,
    pub cancel_distance: f64,
    pub fee_buffer_ratio: f64,
    pub fill_tolerance: f64,
}

impl LevelParams {
    /// Cash needed to buy `qty` at `price` including the fee buffer
    pub fn required_cash(&self, price: f64, qty: f64) -> f64 {
        price * qty * (1.0 + self.fee_buffer_ratio)
    }
}

impl From<&GridConfig> for LevelParams {
    fn from(config: &GridConfig) -> Self {
        Self {
            buy_margin: config.buy_margin,
            cancel_distance: config.cancel_distance(),
            fee_buffer_ratio: config.fee_buffer_ratio,
            fill_tolerance: config.fill_tolerance,
        }
    }
}

/// One grid level and its order lifecycle
///
/// Fields are private so that `sell_price > buy_price` and
/// "order id present iff BUYING/SELLING" hold on every path.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    id: u32,
    buy_price: f64,
    sell_price: f64,
    quantity: f64,
    status: LevelStatus,
    order_id: Option<String>,
    last_action_time: DateTime<Utc>,
}

impl Strategy {
    /// Create a level in STANDBY
    pub fn new(id: u32, buy_price: f64, sell_price: f64, quantity: f64) -> GridResult<Self> {
        if !(sell_price > buy_price) {
            return Err(GridError::InvariantViolation(format!(
                "level {}: sell price {} must exceed buy price {}",
                id, sell_price, buy_price
            )));
        }
        if !(quantity > 0.0) {
            return Err(GridError::InvariantViolation(format!(
                "level {}: quantity {} must be positive",
                id, quantity
            )));
        }

        Ok(Self {
            id,
            buy_price,
            sell_price,
            quantity,
            status: LevelStatus::Standby,
            order_id: None,
            last_action_time: Utc::now(),
        })
    }

    /// Rebuild a level from a snapshot record
    pub fn from_record(record: &LevelRecord) -> GridResult<Self> {
        let mut level = Self::new(record.id, record.buy_price, record.sell_price, record.qty)?;

        if record.status.has_open_order() != record.order_id.is_some() {
            return Err(GridError::InvariantViolation(format!(
                "level {}: status {} inconsistent with order id {:?}",
                record.id, record.status, record.order_id
            )));
        }

        level.status = record.status;
        level.order_id = record.order_id.clone();
        level.last_action_time = record.last_action_time;
        Ok(level)
    }

    pub fn to_record(&self) -> LevelRecord {
        LevelRecord {
            id: self.id,
            buy_price: self.buy_price,
            sell_price: self.sell_price,
            qty: self.quantity,
            status: self.status,
            order_id: self.order_id.clone(),
            last_action_time: self.last_action_time,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn buy_price(&self) -> f64 {
        self.buy_price
    }

    pub fn sell_price(&self) -> f64 {
        self.sell_price
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn status(&self) -> LevelStatus {
        self.status
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn last_action_time(&self) -> DateTime<Utc> {
        self.last_action_time
    }

    pub fn has_open_order(&self) -> bool {
        self.order_id.is_some()
    }

    /// Advance this level by one tick
    ///
    /// Transient exchange failures are absorbed here (logged, retried next
    /// tick). An `Err` is a per-level fault; the caller resets the level
    /// with [`Strategy::reset_after_fault`].
    pub async fn update<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        notifier: &dyn Notifier,
        ctx: &TickContext<'_>,
        params: &LevelParams,
    ) -> GridResult<()> {
        match self.status {
            LevelStatus::Standby => {
                if ctx.price <= self.buy_price + params.buy_margin {
                    self.place_buy(exchange, notifier, ctx, params).await?;
                }
            }
            LevelStatus::Buying => {
                let threshold = ctx.price - params.cancel_distance;
                if self.buy_price <= threshold {
                    match self.cancel_open_order(exchange, ctx.asset).await {
                        Ok(true) => {
                            let msg = format!(
                                "[Strategy {}] Pending buy cancelled to free cash: buy={}, price={}, threshold={}",
                                self.id, self.buy_price, ctx.price, threshold
                            );
                            info!("{}", msg);
                            notifier.send(&msg).await;
                            return Ok(());
                        }
                        // Not cancelled: the order may already be filled
                        Ok(false) => {}
                        Err(e) => warn!("[Strategy {}] Cancel failed, polling fill instead: {}", self.id, e),
                    }
                }

                self.poll_fill(exchange, notifier, ctx.asset, params).await?;
                if self.status == LevelStatus::Active {
                    self.place_sell(exchange, notifier, ctx.asset).await?;
                }
            }
            LevelStatus::Active => {
                self.place_sell(exchange, notifier, ctx.asset).await?;
            }
            LevelStatus::Selling => {
                self.poll_fill(exchange, notifier, ctx.asset, params).await?;
            }
        }
        Ok(())
    }

    /// STANDBY -> BUYING, subject to the cash guard.
    ///
    /// Returns whether an order was placed.
    pub async fn place_buy<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        notifier: &dyn Notifier,
        ctx: &TickContext<'_>,
        params: &LevelParams,
    ) -> GridResult<bool> {
        if self.status != LevelStatus::Standby {
            return Ok(false);
        }

        let Some(balance) = ctx.balance else {
            let msg = format!(
                "[Strategy {}] Buy deferred: balance unavailable this tick",
                self.id
            );
            warn!("{}", msg);
            notifier.send(&msg).await;
            return Ok(false);
        };

        let required = params.required_cash(self.buy_price, self.quantity);
        if balance.available_cash < required {
            let msg = format!(
                "[Strategy {}] Buy deferred, insufficient cash: need {:.2} > available {:.2} (price={}, qty={})",
                self.id, required, balance.available_cash, self.buy_price, self.quantity
            );
            warn!("{}", msg);
            notifier.send(&msg).await;
            return Ok(false);
        }

        self.submit(exchange, notifier, ctx.asset, OrderSide::Buy).await
    }

    /// ACTIVE -> SELLING. Returns whether an order was placed.
    async fn place_sell<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        notifier: &dyn Notifier,
        asset: &str,
    ) -> GridResult<bool> {
        if self.status != LevelStatus::Active {
            return Ok(false);
        }

        if self.sell_price <= self.buy_price {
            warn!(
                "[Strategy {}] Sell skipped, sell price {} <= buy price {}",
                self.id, self.sell_price, self.buy_price
            );
            return Ok(false);
        }

        self.submit(exchange, notifier, asset, OrderSide::Sell).await
    }

    async fn submit<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        notifier: &dyn Notifier,
        asset: &str,
        side: OrderSide,
    ) -> GridResult<bool> {
        let price = match side {
            OrderSide::Buy => self.buy_price,
            OrderSide::Sell => self.sell_price,
        };

        match exchange.place_limit_order(asset, side, price, self.quantity).await {
            Ok(order) => {
                if order.order_id.is_empty() {
                    let msg = format!("[Strategy {}] {} rejected: empty order id", self.id, side);
                    error!("{}", msg);
                    notifier.send(&msg).await;
                    return Ok(false);
                }

                let next = match side {
                    OrderSide::Buy => LevelStatus::Buying,
                    OrderSide::Sell => LevelStatus::Selling,
                };
                self.open(next, order.order_id.clone());

                let msg = format!(
                    "[Strategy {}] {} submitted: price={}, qty={}, id={}",
                    self.id, side, price, self.quantity, order.order_id
                );
                info!("{}", msg);
                notifier.send(&msg).await;
                Ok(true)
            }
            Err(e) if e.is_transient() => {
                let msg = format!("[Strategy {}] {} order failed: {}", self.id, side, e);
                error!("{}", msg);
                notifier.send(&msg).await;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn poll_fill<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        notifier: &dyn Notifier,
        asset: &str,
        params: &LevelParams,
    ) -> GridResult<()> {
        let Some(order_id) = self.order_id.clone() else {
            return Err(GridError::InvariantViolation(format!(
                "level {} is {} without an order id",
                self.id, self.status
            )));
        };

        let status = match exchange.get_order_status(asset, &order_id).await {
            Ok(status) => status,
            Err(e) if e.is_transient() => {
                error!("[Strategy {}] Fill query failed: {}", self.id, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match status {
            FillStatus::NoData => {
                debug!("[Strategy {}] No fill data yet for {}", self.id, order_id);
            }
            FillStatus::NotFound => return Err(GridError::OrderNotFound(order_id)),
            FillStatus::Report(report) => {
                report.validate().map_err(GridError::MalformedResponse)?;
                self.apply_report(notifier, &order_id, &report, params).await;
            }
        }
        Ok(())
    }

    async fn apply_report(
        &mut self,
        notifier: &dyn Notifier,
        order_id: &str,
        report: &FillReport,
        params: &LevelParams,
    ) {
        if report.is_fully_filled(params.fill_tolerance) {
            let (next, msg) = match self.status {
                LevelStatus::Buying => (
                    LevelStatus::Active,
                    format!(
                        "[Strategy {}] BUY filled -> awaiting sell (id={}, qty={})",
                        self.id, order_id, report.ordered_qty
                    ),
                ),
                _ => (
                    LevelStatus::Standby,
                    format!(
                        "[Strategy {}] SELL filled -> reset (id={}, qty={})",
                        self.id, order_id, report.ordered_qty
                    ),
                ),
            };
            self.close(next);
            info!("{}", msg);
            notifier.send(&msg).await;
            return;
        }

        if report.state == OrderState::Cancelled {
            let next = self.status_after_cancel();
            let msg = format!(
                "[Strategy {}] Order {} cancelled externally (filled {} of {}) -> {}",
                self.id,
                order_id,
                report.filled_qty(),
                report.ordered_qty,
                next
            );
            self.close(next);
            warn!("{}", msg);
            notifier.send(&msg).await;
            return;
        }

        info!(
            "[Strategy {}] Partial fill: filled={}, ordered={}, remaining={}",
            self.id,
            report.filled_qty(),
            report.ordered_qty,
            report.remaining_qty()
        );
    }

    /// Cancel the open order, if any.
    ///
    /// On success BUYING reverts to STANDBY and SELLING to ACTIVE. Returns
    /// `Ok(false)` when there was nothing to cancel or the exchange refused.
    pub async fn cancel_open_order<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        asset: &str,
    ) -> GridResult<bool> {
        let Some(order_id) = self.order_id.clone() else {
            return Ok(false);
        };

        if exchange.cancel_order(asset, &order_id).await? {
            info!("[Strategy {}] Open order cancelled: id={}", self.id, order_id);
            let next = self.status_after_cancel();
            self.close(next);
            Ok(true)
        } else {
            warn!("[Strategy {}] Exchange refused cancel of {}", self.id, order_id);
            Ok(false)
        }
    }

    /// Force the level back to STANDBY after a per-level fault
    pub async fn reset_after_fault<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        notifier: &dyn Notifier,
        asset: &str,
        fault: &GridError,
    ) {
        let msg = format!("[Strategy {}] Fault in {}: {}", self.id, self.status, fault);
        error!("{}", msg);
        notifier.send(&msg).await;

        if let Err(e) = self.cancel_open_order(exchange, asset).await {
            error!("[Strategy {}] Cancel during fault reset failed: {}", self.id, e);
        }
        self.close(LevelStatus::Standby);
    }

    /// Clear a recovered order id the exchange no longer knows
    pub(crate) fn drop_unknown_order(&mut self) {
        let next = self.status_after_cancel();
        self.close(next);
    }

    fn status_after_cancel(&self) -> LevelStatus {
        match self.status {
            LevelStatus::Selling | LevelStatus::Active => LevelStatus::Active,
            LevelStatus::Buying | LevelStatus::Standby => LevelStatus::Standby,
        }
    }

    fn open(&mut self, status: LevelStatus, order_id: String) {
        debug_assert!(status.has_open_order());
        self.status = status;
        self.order_id = Some(order_id);
        self.last_action_time = Utc::now();
    }

    fn close(&mut self, status: LevelStatus) {
        debug_assert!(!status.has_open_order());
        self.status = status;
        self.order_id = None;
        self.last_action_time = Utc::now();
    }
}
