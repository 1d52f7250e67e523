//! Paper Trading Market Implementation
//!
//! Takes live prices from a wrapped [`PriceFeed`] but simulates order
//! execution locally: a resting limit order fills in full at its limit price
//! as soon as an observed price crosses it. Finished orders leave the book
//! once their final state has been reported; cancelled ones leave at once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::grid::errors::{GridError, GridResult};
use crate::grid::executor::{GridExchange, PriceFeed};
use crate::grid::types::{
    BalanceSnapshot, FillReport, FillStatus, OrderRef, OrderSide, OrderState,
};

/// Input configuration for creating a PaperTradingMarket
#[derive(Debug, Clone)]
pub struct PaperTradingMarketInput {
    /// Asset this market trades
    pub asset: String,
    /// Initial balance in quote currency
    pub initial_cash: f64,
    /// Initial holding of the base asset
    pub initial_asset: f64,
    /// Average cost of the initial holding
    pub initial_avg_cost: f64,
    /// Fee rate (e.g., 0.0004 = 0.04%)
    pub fee_rate: f64,
}

impl PaperTradingMarketInput {
    pub fn new(asset: impl Into<String>, initial_cash: f64) -> Self {
        Self {
            asset: asset.into(),
            initial_cash,
            initial_asset: 0.0,
            initial_avg_cost: 0.0,
            fee_rate: 0.0004,
        }
    }
}

/// Internal order tracking for paper trading
#[derive(Debug, Clone)]
struct PaperOrder {
    side: OrderSide,
    limit_price: f64,
    qty: f64,
    executions: Vec<f64>,
    state: OrderState,
}

impl PaperOrder {
    fn new(side: OrderSide, limit_price: f64, qty: f64) -> Self {
        Self {
            side,
            limit_price,
            qty,
            executions: Vec::new(),
            state: OrderState::Open,
        }
    }

    fn filled(&self) -> f64 {
        self.executions.iter().sum()
    }

    fn remaining(&self) -> f64 {
        (self.qty - self.filled()).max(0.0)
    }

    /// Check if this order should be filled at the given price
    fn should_fill(&self, price: f64) -> bool {
        if self.state != OrderState::Open {
            return false;
        }

        match self.side {
            OrderSide::Buy => price <= self.limit_price,
            OrderSide::Sell => price >= self.limit_price,
        }
    }
}

/// Long-only spot position
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaperPosition {
    /// Units held, including those locked in open sells
    pub size: f64,
    /// Average acquisition cost
    pub avg_cost: f64,
    /// Realized PnL
    pub realized_pnl: f64,
}

impl PaperPosition {
    fn apply_buy(&mut self, qty: f64, price: f64) {
        let total_cost = self.avg_cost * self.size + price * qty;
        self.size += qty;
        self.avg_cost = if self.size > 0.0 { total_cost / self.size } else { 0.0 };
    }

    fn apply_sell(&mut self, qty: f64, price: f64) {
        let close_qty = qty.min(self.size);
        self.realized_pnl += (price - self.avg_cost) * close_qty;
        self.size -= close_qty;
        if self.size <= 0.0 {
            self.size = 0.0;
            self.avg_cost = 0.0;
        }
    }
}

#[derive(Debug)]
struct Book {
    orders: HashMap<String, PaperOrder>,
    /// Cash not reserved by open buys
    cash: f64,
    /// Units not locked by open sells
    free_asset: f64,
    position: PaperPosition,
    total_fees: f64,
    last_price: Option<f64>,
}

impl Book {
    fn match_orders(&mut self, price: f64, fee_rate: f64) {
        let crossing: Vec<String> = self
            .orders
            .iter()
            .filter(|(_, o)| o.should_fill(price))
            .map(|(id, _)| id.clone())
            .collect();

        for id in crossing {
            self.execute_fill(&id, fee_rate);
        }
    }

    /// Fill the rest of an order at its limit price
    fn execute_fill(&mut self, order_id: &str, fee_rate: f64) {
        let Some(order) = self.orders.get_mut(order_id) else {
            return;
        };

        let qty = order.remaining();
        let price = order.limit_price;
        let notional = qty * price;
        let fee = notional * fee_rate;

        order.executions.push(qty);
        order.state = OrderState::Completed;
        let side = order.side;

        match side {
            // Notional was reserved at placement
            OrderSide::Buy => {
                self.cash -= fee;
                self.free_asset += qty;
                self.position.apply_buy(qty, price);
            }
            // Units were locked at placement
            OrderSide::Sell => {
                self.cash += notional - fee;
                self.position.apply_sell(qty, price);
            }
        }
        self.total_fees += fee;

        info!(
            "Paper fill: {} {} at {} (fee: {:.4}), id={}",
            side, qty, price, fee, order_id
        );
    }
}

/// Paper Trading Market implementation
///
/// Cheap to clone; clones share one order book, so the same market can be
/// handed to a runner both as exchange and as price feed.
pub struct PaperTradingMarket<F: PriceFeed> {
    asset: String,
    feed: Arc<F>,
    book: Arc<Mutex<Book>>,
    fee_rate: f64,
}

impl<F: PriceFeed> Clone for PaperTradingMarket<F> {
    fn clone(&self) -> Self {
        Self {
            asset: self.asset.clone(),
            feed: Arc::clone(&self.feed),
            book: Arc::clone(&self.book),
            fee_rate: self.fee_rate,
        }
    }
}

impl<F: PriceFeed> PaperTradingMarket<F> {
    /// Create a new PaperTradingMarket over a live price feed
    pub fn new(input: PaperTradingMarketInput, feed: F) -> Self {
        info!(
            "PaperTradingMarket for {} started with cash {} and {} units",
            input.asset, input.initial_cash, input.initial_asset
        );

        let position = PaperPosition {
            size: input.initial_asset,
            avg_cost: input.initial_avg_cost,
            realized_pnl: 0.0,
        };

        Self {
            asset: input.asset,
            feed: Arc::new(feed),
            book: Arc::new(Mutex::new(Book {
                orders: HashMap::new(),
                cash: input.initial_cash,
                free_asset: input.initial_asset,
                position,
                total_fees: 0.0,
                last_price: None,
            })),
            fee_rate: input.fee_rate,
        }
    }

    /// Record an observed price and fill every order it crosses
    pub async fn update_price(&self, price: f64) {
        let mut book = self.book.lock().await;
        book.last_price = Some(price);
        book.match_orders(price, self.fee_rate);
    }

    pub async fn position(&self) -> PaperPosition {
        self.book.lock().await.position
    }

    pub async fn total_fees(&self) -> f64 {
        self.book.lock().await.total_fees
    }

    /// Get count of pending orders
    pub async fn pending_order_count(&self) -> usize {
        self.book
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.state == OrderState::Open)
            .count()
    }

    fn check_asset(&self, asset: &str) -> GridResult<()> {
        if asset != self.asset {
            return Err(GridError::OrderRejected(format!(
                "paper market trades {}, not {}",
                self.asset, asset
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<F: PriceFeed> GridExchange for PaperTradingMarket<F> {
    async fn place_limit_order(
        &self,
        asset: &str,
        side: OrderSide,
        price: f64,
        qty: f64,
    ) -> GridResult<OrderRef> {
        self.check_asset(asset)?;
        if !(price > 0.0 && qty > 0.0) {
            return Err(GridError::OrderRejected(format!(
                "invalid order {} {} @ {}",
                side, qty, price
            )));
        }

        let mut book = self.book.lock().await;
        match side {
            OrderSide::Buy => {
                let required = price * qty * (1.0 + self.fee_rate);
                if book.cash < required {
                    return Err(GridError::InsufficientBalance {
                        required,
                        available: book.cash,
                    });
                }
                book.cash -= price * qty;
            }
            OrderSide::Sell => {
                if book.free_asset + 1e-12 < qty {
                    return Err(GridError::InsufficientBalance {
                        required: qty,
                        available: book.free_asset,
                    });
                }
                book.free_asset = (book.free_asset - qty).max(0.0);
            }
        }

        let order_id = Uuid::new_v4().to_string();
        book.orders
            .insert(order_id.clone(), PaperOrder::new(side, price, qty));
        info!("Paper order {}: {} {} {} @ {}", order_id, side, qty, asset, price);

        // Fill immediately if the last seen price already crosses
        if let Some(last) = book.last_price {
            book.match_orders(last, self.fee_rate);
        }

        Ok(OrderRef::new(order_id, side, price, qty))
    }

    async fn cancel_order(&self, asset: &str, order_id: &str) -> GridResult<bool> {
        self.check_asset(asset)?;
        let mut book = self.book.lock().await;

        match book.orders.get(order_id) {
            Some(order) if order.state == OrderState::Open => {}
            _ => return Ok(false),
        }
        // The caller learns the outcome from the return value
        let Some(order) = book.orders.remove(order_id) else {
            return Ok(false);
        };

        match order.side {
            OrderSide::Buy => book.cash += order.remaining() * order.limit_price,
            OrderSide::Sell => book.free_asset += order.remaining(),
        }
        info!("Paper order {} cancelled", order_id);
        Ok(true)
    }

    async fn get_order_status(&self, asset: &str, order_id: &str) -> GridResult<FillStatus> {
        self.check_asset(asset)?;
        let mut book = self.book.lock().await;

        let Some(order) = book.orders.get(order_id) else {
            return Ok(FillStatus::NotFound);
        };
        let report = FillReport::new(order.qty, order.executions.clone(), order.state);
        let finished = order.state != OrderState::Open;

        // Finished orders are reported once, then forgotten
        if finished {
            book.orders.remove(order_id);
            debug!("Paper order {} reported final, dropped from book", order_id);
        }
        Ok(FillStatus::Report(report))
    }

    async fn get_balance(&self, asset: &str) -> GridResult<BalanceSnapshot> {
        self.check_asset(asset)?;
        let book = self.book.lock().await;
        Ok(BalanceSnapshot::new(
            book.cash,
            book.free_asset,
            book.position.avg_cost,
        ))
    }
}

#[async_trait]
impl<F: PriceFeed> PriceFeed for PaperTradingMarket<F> {
    async fn current_price(&self, asset: &str) -> GridResult<f64> {
        let price = self.feed.current_price(asset).await?;
        debug!("Paper market observed {} @ {}", asset, price);
        self.update_price(price).await;
        Ok(price)
    }
}
