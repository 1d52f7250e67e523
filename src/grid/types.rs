//! Core data types for grid trading

use serde::{Deserialize, Serialize};

/// Absolute tolerance used when comparing grid prices
pub const EPSILON: f64 = 1e-9;

/// Compare two grid prices for equality
pub fn prices_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

/// Round a price to the nearest multiple of `tick`
pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    (price / tick).round() * tick
}

/// Round a quantity to a fixed number of decimals
pub fn round_qty(qty: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (qty * factor).round() / factor
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a single grid level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevelStatus {
    /// Waiting for the price to come down to the buy trigger
    Standby,
    /// Limit buy resting on the exchange
    Buying,
    /// Bought, sell not yet placed
    Active,
    /// Limit sell resting on the exchange
    Selling,
}

impl LevelStatus {
    /// States that carry exactly one open order
    pub fn has_open_order(&self) -> bool {
        matches!(self, LevelStatus::Buying | LevelStatus::Selling)
    }
}

impl std::fmt::Display for LevelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LevelStatus::Standby => "STANDBY",
            LevelStatus::Buying => "BUYING",
            LevelStatus::Active => "ACTIVE",
            LevelStatus::Selling => "SELLING",
        };
        f.write_str(s)
    }
}

/// Reference to an order accepted by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRef {
    /// Exchange-assigned order id
    pub order_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub qty: f64,
}

impl OrderRef {
    pub fn new(order_id: impl Into<String>, side: OrderSide, price: f64, qty: f64) -> Self {
        Self {
            order_id: order_id.into(),
            side,
            price,
            qty,
        }
    }
}

/// Exchange-side lifecycle label of an order.
///
/// Advisory only: a `Completed` order may still be partially filled, so
/// fill decisions always compare quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Open,
    Completed,
    Cancelled,
}

/// Fill data for one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub ordered_qty: f64,
    /// Quantities of the individual executions
    pub executions: Vec<f64>,
    pub state: OrderState,
}

impl FillReport {
    pub fn new(ordered_qty: f64, executions: Vec<f64>, state: OrderState) -> Self {
        Self {
            ordered_qty,
            executions,
            state,
        }
    }

    pub fn filled_qty(&self) -> f64 {
        self.executions.iter().sum()
    }

    /// Quantity still open, never negative
    pub fn remaining_qty(&self) -> f64 {
        (self.ordered_qty - self.filled_qty()).max(0.0)
    }

    /// Full fill within `tolerance`
    pub fn is_fully_filled(&self, tolerance: f64) -> bool {
        self.ordered_qty > 0.0 && self.filled_qty() >= self.ordered_qty - tolerance
    }

    /// Reject reports the engine cannot reason about
    pub fn validate(&self) -> Result<(), String> {
        if !self.ordered_qty.is_finite() || self.ordered_qty < 0.0 {
            return Err(format!("invalid ordered quantity {}", self.ordered_qty));
        }
        if let Some(bad) = self.executions.iter().find(|q| !q.is_finite() || **q < 0.0) {
            return Err(format!("invalid execution quantity {}", bad));
        }
        Ok(())
    }
}

/// Answer to a fill poll
#[derive(Debug, Clone, PartialEq)]
pub enum FillStatus {
    /// Exchange returned no data yet; treat as pending
    NoData,
    /// Exchange does not know the order id
    NotFound,
    Report(FillReport),
}

/// Account balances for the traded market, fetched fresh every tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Quote currency available for new buys
    pub available_cash: f64,
    /// Base asset held and not locked in orders
    pub available_asset: f64,
    /// Exchange-reported average acquisition cost of the base asset
    pub avg_cost: f64,
}

impl BalanceSnapshot {
    pub fn new(available_cash: f64, available_asset: f64, avg_cost: f64) -> Self {
        Self {
            available_cash,
            available_asset,
            avg_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_fill_is_not_full() {
        let report = FillReport::new(20.0, vec![12.5], OrderState::Completed);
        assert!(!report.is_fully_filled(1e-9));
        assert!((report.remaining_qty() - 7.5).abs() < 1e-12);
    }

    #[test]
    fn test_two_partials_sum_to_full() {
        let report = FillReport::new(20.0, vec![12.5, 7.5], OrderState::Open);
        assert!(report.is_fully_filled(1e-9));
        assert_eq!(report.remaining_qty(), 0.0);
    }

    #[test]
    fn test_zero_ordered_qty_never_full() {
        let report = FillReport::new(0.0, vec![], OrderState::Completed);
        assert!(!report.is_fully_filled(1e-9));
    }

    #[test]
    fn test_report_validation() {
        assert!(FillReport::new(1.0, vec![0.5], OrderState::Open).validate().is_ok());
        assert!(FillReport::new(f64::NAN, vec![], OrderState::Open).validate().is_err());
        assert!(FillReport::new(1.0, vec![-0.1], OrderState::Open).validate().is_err());
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&LevelStatus::Selling).unwrap();
        assert_eq!(json, "\"SELLING\"");
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(round_to_tick(1413.7, 1.0), 1414.0);
        assert!((round_to_tick(0.1234, 0.01) - 0.12).abs() < 1e-12);
        assert_eq!(round_qty(1.2345678, 6), 1.234568);
        assert!(prices_equal(0.1 + 0.2, 0.3));
    }
}
