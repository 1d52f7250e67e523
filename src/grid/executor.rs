//! Exchange abstraction for grid trading - enables mocking for tests

use async_trait::async_trait;

use super::errors::GridResult;
use super::types::{BalanceSnapshot, FillStatus, OrderRef, OrderSide};

/// Exchange operations trait - can be mocked for testing
///
/// Implementations are expected to bound every call with their own timeout.
/// The engine never retries inside a tick; a failed call is retried on the
/// next one.
#[async_trait]
pub trait GridExchange: Send + Sync {
    /// Place a limit order
    async fn place_limit_order(
        &self,
        asset: &str,
        side: OrderSide,
        price: f64,
        qty: f64,
    ) -> GridResult<OrderRef>;

    /// Cancel an order by id. `Ok(false)` means the exchange refused, e.g.
    /// because the order already completed.
    async fn cancel_order(&self, asset: &str, order_id: &str) -> GridResult<bool>;

    /// Poll the fill state of an order
    async fn get_order_status(&self, asset: &str, order_id: &str) -> GridResult<FillStatus>;

    /// Fetch balances for the traded market
    async fn get_balance(&self, asset: &str) -> GridResult<BalanceSnapshot>;
}

/// Current market price source
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn current_price(&self, asset: &str) -> GridResult<f64>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Mock exchange for testing grid bots without a real exchange connection.
pub mod mock {
    use super::*;
    use crate::grid::errors::GridError;
    use crate::grid::types::{FillReport, OrderState};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Mock exchange for testing
    ///
    /// Placed orders report as open with no executions until a test scripts
    /// a status for them.
    #[derive(Default)]
    pub struct MockExchange {
        pub orders: Arc<Mutex<Vec<OrderRef>>>,
        pub cancelled_ids: Arc<Mutex<Vec<String>>>,
        pub statuses: Arc<Mutex<HashMap<String, FillStatus>>>,
        pub balance: Arc<Mutex<BalanceSnapshot>>,
        pub status_queries: Arc<Mutex<Vec<String>>>,
        next_id: AtomicU64,
        pub should_fail_place: Arc<Mutex<bool>>,
        pub should_fail_cancel: Arc<Mutex<bool>>,
        pub refuse_cancel: Arc<Mutex<bool>>,
        pub should_fail_status: Arc<Mutex<bool>>,
        pub should_fail_balance: Arc<Mutex<bool>>,
    }

    impl MockExchange {
        pub fn new(balance: BalanceSnapshot) -> Self {
            Self {
                balance: Arc::new(Mutex::new(balance)),
                next_id: AtomicU64::new(1),
                ..Default::default()
            }
        }

        /// Exchange with plenty of cash and no asset
        pub fn funded() -> Self {
            Self::new(BalanceSnapshot::new(1_000_000_000.0, 0.0, 0.0))
        }

        pub async fn set_balance(&self, balance: BalanceSnapshot) {
            *self.balance.lock().await = balance;
        }

        pub async fn set_status(&self, order_id: &str, status: FillStatus) {
            self.statuses.lock().await.insert(order_id.to_string(), status);
        }

        /// Record executions against an order previously placed
        pub async fn fill(&self, order_id: &str, executions: Vec<f64>, state: OrderState) {
            let ordered = self
                .orders
                .lock()
                .await
                .iter()
                .find(|o| o.order_id == order_id)
                .map(|o| o.qty)
                .unwrap_or(0.0);
            self.set_status(
                order_id,
                FillStatus::Report(FillReport::new(ordered, executions, state)),
            )
            .await;
        }

        /// Fill an order completely in one execution
        pub async fn fill_completely(&self, order_id: &str) {
            let ordered = self
                .orders
                .lock()
                .await
                .iter()
                .find(|o| o.order_id == order_id)
                .map(|o| o.qty)
                .unwrap_or(0.0);
            self.fill(order_id, vec![ordered], OrderState::Completed).await;
        }

        pub async fn set_should_fail_place(&self, fail: bool) {
            *self.should_fail_place.lock().await = fail;
        }

        pub async fn set_should_fail_cancel(&self, fail: bool) {
            *self.should_fail_cancel.lock().await = fail;
        }

        pub async fn set_refuse_cancel(&self, refuse: bool) {
            *self.refuse_cancel.lock().await = refuse;
        }

        pub async fn set_should_fail_status(&self, fail: bool) {
            *self.should_fail_status.lock().await = fail;
        }

        pub async fn set_should_fail_balance(&self, fail: bool) {
            *self.should_fail_balance.lock().await = fail;
        }

        pub async fn placed(&self) -> Vec<OrderRef> {
            self.orders.lock().await.clone()
        }

        pub async fn placed_on(&self, side: OrderSide) -> Vec<OrderRef> {
            self.orders
                .lock()
                .await
                .iter()
                .filter(|o| o.side == side)
                .cloned()
                .collect()
        }

        pub async fn cancelled(&self) -> Vec<String> {
            self.cancelled_ids.lock().await.clone()
        }
    }

    #[async_trait]
    impl GridExchange for MockExchange {
        async fn place_limit_order(
            &self,
            _asset: &str,
            side: OrderSide,
            price: f64,
            qty: f64,
        ) -> GridResult<OrderRef> {
            if *self.should_fail_place.lock().await {
                return Err(GridError::Exchange("Mock failure".into()));
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let order = OrderRef::new(format!("order-{}", id), side, price, qty);
            self.orders.lock().await.push(order.clone());
            Ok(order)
        }

        async fn cancel_order(&self, _asset: &str, order_id: &str) -> GridResult<bool> {
            if *self.should_fail_cancel.lock().await {
                return Err(GridError::Exchange("Mock cancel failure".into()));
            }
            if *self.refuse_cancel.lock().await {
                return Ok(false);
            }
            self.cancelled_ids.lock().await.push(order_id.to_string());
            Ok(true)
        }

        async fn get_order_status(&self, _asset: &str, order_id: &str) -> GridResult<FillStatus> {
            self.status_queries.lock().await.push(order_id.to_string());
            if *self.should_fail_status.lock().await {
                return Err(GridError::Exchange("Mock status failure".into()));
            }
            if let Some(status) = self.statuses.lock().await.get(order_id) {
                return Ok(status.clone());
            }
            let placed = self
                .orders
                .lock()
                .await
                .iter()
                .find(|o| o.order_id == order_id)
                .map(|o| o.qty);
            Ok(match placed {
                Some(qty) => FillStatus::Report(FillReport::new(qty, Vec::new(), OrderState::Open)),
                None => FillStatus::NotFound,
            })
        }

        async fn get_balance(&self, _asset: &str) -> GridResult<BalanceSnapshot> {
            if *self.should_fail_balance.lock().await {
                return Err(GridError::Exchange("Mock balance failure".into()));
            }
            Ok(*self.balance.lock().await)
        }
    }

    /// Price feed replaying scripted results, then repeating the last price
    #[derive(Default)]
    pub struct MockPriceFeed {
        script: Arc<Mutex<VecDeque<GridResult<f64>>>>,
        last: Arc<Mutex<Option<f64>>>,
    }

    impl MockPriceFeed {
        pub fn new(price: f64) -> Self {
            Self {
                script: Arc::new(Mutex::new(VecDeque::new())),
                last: Arc::new(Mutex::new(Some(price))),
            }
        }

        pub fn scripted(results: Vec<GridResult<f64>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(results.into())),
                last: Arc::new(Mutex::new(None)),
            }
        }
    }

    #[async_trait]
    impl PriceFeed for MockPriceFeed {
        async fn current_price(&self, asset: &str) -> GridResult<f64> {
            if let Some(next) = self.script.lock().await.pop_front() {
                if let Ok(price) = &next {
                    *self.last.lock().await = Some(*price);
                }
                return next;
            }
            self.last
                .lock()
                .await
                .ok_or_else(|| GridError::PriceUnavailable(asset.to_string()))
        }
    }
}
