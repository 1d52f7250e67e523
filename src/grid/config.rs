//! Grid trading configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::errors::{GridError, GridResult};

/// Grid bot configuration
///
/// Immutable for the lifetime of a run. The initial ladder is
/// `buy_price = start_price - buy_interval * i` for `i in 0..level_count`,
/// each level selling `sell_interval` above its buy price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Asset/coin to trade (e.g., "DOGE", "USDT")
    pub asset: String,

    /// Buy price of the top level of the initial ladder
    pub start_price: f64,

    /// Number of levels in the initial ladder
    pub level_count: u32,

    /// Order quantity per level
    pub quantity: f64,

    /// Distance between adjacent buy prices
    pub buy_interval: f64,

    /// Distance from a level's buy price to its sell price
    pub sell_interval: f64,

    /// Price tolerance above a buy price that still triggers a buy
    #[serde(default)]
    pub buy_margin: f64,

    /// Pending buys this many intervals below the price are cancelled
    #[serde(default = "default_cancel_depth")]
    pub cancel_depth: u32,

    /// Maximum number of levels created above `start_price`
    #[serde(default = "default_max_up_strategies")]
    pub max_up_strategies: u32,

    /// Seconds between reconciliation ticks
    #[serde(default = "default_loop_interval")]
    pub loop_interval_secs: u64,

    /// Publish a status digest every N loops
    #[serde(default = "default_report_interval")]
    pub report_interval_loops: u64,

    /// Write a snapshot every N loops
    #[serde(default = "default_save_interval")]
    pub save_interval_loops: u64,

    /// Snapshot file path
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Rebuild the grid from the snapshot file at startup
    #[serde(default)]
    pub resume_from_snapshot: bool,

    /// Extra cash required on top of price * qty before buying
    #[serde(default = "default_fee_buffer")]
    pub fee_buffer_ratio: f64,

    /// Numeric tolerance for full-fill detection
    #[serde(default = "default_fill_tolerance")]
    pub fill_tolerance: f64,

    /// Backoff after a loop-level failure, in seconds
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
}

fn default_cancel_depth() -> u32 {
    5
}

fn default_max_up_strategies() -> u32 {
    5
}

fn default_loop_interval() -> u64 {
    3
}

fn default_report_interval() -> u64 {
    300
}

fn default_save_interval() -> u64 {
    60
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("snapshots/strategies.json")
}

fn default_fee_buffer() -> f64 {
    0.001
}

fn default_fill_tolerance() -> f64 {
    1e-9
}

fn default_error_backoff() -> u64 {
    60
}

impl GridConfig {
    /// Create a new grid configuration with required parameters
    ///
    /// Buy and sell intervals default to 1; everything else takes the
    /// serde defaults.
    pub fn new(asset: impl Into<String>, start_price: f64, level_count: u32, quantity: f64) -> Self {
        Self {
            asset: asset.into(),
            start_price,
            level_count,
            quantity,
            buy_interval: 1.0,
            sell_interval: 1.0,
            buy_margin: 0.0,
            cancel_depth: default_cancel_depth(),
            max_up_strategies: default_max_up_strategies(),
            loop_interval_secs: default_loop_interval(),
            report_interval_loops: default_report_interval(),
            save_interval_loops: default_save_interval(),
            snapshot_path: default_snapshot_path(),
            resume_from_snapshot: false,
            fee_buffer_ratio: default_fee_buffer(),
            fill_tolerance: default_fill_tolerance(),
            error_backoff_secs: default_error_backoff(),
        }
    }

    /// Builder: set buy and sell intervals
    pub fn with_intervals(mut self, buy_interval: f64, sell_interval: f64) -> Self {
        self.buy_interval = buy_interval;
        self.sell_interval = sell_interval;
        self
    }

    /// Builder: set buy margin
    pub fn with_buy_margin(mut self, margin: f64) -> Self {
        self.buy_margin = margin;
        self
    }

    /// Builder: set cancel depth
    pub fn with_cancel_depth(mut self, depth: u32) -> Self {
        self.cancel_depth = depth;
        self
    }

    /// Builder: set the upward expansion cap
    pub fn with_max_up_strategies(mut self, max: u32) -> Self {
        self.max_up_strategies = max;
        self
    }

    /// Builder: set report and snapshot cadences (in loops)
    pub fn with_cadence(mut self, report_loops: u64, save_loops: u64) -> Self {
        self.report_interval_loops = report_loops;
        self.save_interval_loops = save_loops;
        self
    }

    /// Builder: set the snapshot file path
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    /// Builder: resume from the snapshot file at startup
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume_from_snapshot = resume;
        self
    }

    /// Builder: set the fee buffer ratio
    pub fn with_fee_buffer(mut self, ratio: f64) -> Self {
        self.fee_buffer_ratio = ratio;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> GridResult<()> {
        if self.asset.is_empty() {
            return Err(GridError::InvalidConfig("asset cannot be empty".into()));
        }

        if self.level_count == 0 {
            return Err(GridError::InvalidConfig("level_count must be at least 1".into()));
        }

        if self.quantity <= 0.0 {
            return Err(GridError::InvalidConfig("quantity must be positive".into()));
        }

        if self.buy_interval <= 0.0 {
            return Err(GridError::InvalidConfig("buy_interval must be positive".into()));
        }

        if self.sell_interval <= 0.0 {
            return Err(GridError::InvalidConfig(
                "sell_interval must be positive so every level sells above its buy".into(),
            ));
        }

        if self.buy_margin < 0.0 {
            return Err(GridError::InvalidConfig("buy_margin cannot be negative".into()));
        }

        if self.lowest_buy_price() <= 0.0 {
            return Err(GridError::InvalidConfig(format!(
                "lowest level buy price {} must be positive",
                self.lowest_buy_price()
            )));
        }

        if !(0.0..1.0).contains(&self.fee_buffer_ratio) {
            return Err(GridError::InvalidConfig(
                "fee_buffer_ratio must be in [0.0, 1.0)".into(),
            ));
        }

        if self.report_interval_loops == 0 || self.save_interval_loops == 0 {
            return Err(GridError::InvalidConfig(
                "report and save cadences must be at least 1 loop".into(),
            ));
        }

        Ok(())
    }

    /// Buy price of initial level `index`
    pub fn level_buy_price(&self, index: u32) -> f64 {
        self.start_price - self.buy_interval * index as f64
    }

    /// Buy price of the bottom level of the initial ladder
    pub fn lowest_buy_price(&self) -> f64 {
        self.level_buy_price(self.level_count.saturating_sub(1))
    }

    /// Buy price of the expansion level at `offset` above `start_price`
    pub fn upward_buy_price(&self, offset: u32) -> f64 {
        self.start_price + self.buy_interval * offset as f64
    }

    /// Price distance below the current price beyond which pending buys
    /// are cancelled
    pub fn cancel_distance(&self) -> f64 {
        self.buy_interval * self.cancel_depth as f64
    }
}
