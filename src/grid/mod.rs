//! Split (grid) trading engine
//!
//! A ladder of independent price levels, each cycling through
//! `STANDBY -> BUYING -> ACTIVE -> SELLING -> STANDBY`, reconciled against
//! the exchange on a fixed polling interval. The ladder grows upward when
//! the price breaks above its top.
//!
//! # Architecture
//!
//! - [`config`] - Grid configuration and validation
//! - [`types`] - Core data types (LevelStatus, FillReport, etc.)
//! - [`errors`] - Grid-specific error types
//! - [`executor`] - Exchange and price feed traits (mockable for testing)
//! - [`notifier`] - Best-effort operator alerts
//! - [`strategy`] - Per-level state machine
//! - [`manager`] - Ladder ownership and upward expansion
//! - [`snapshot`] - JSON snapshots of level state
//! - [`ticks`] - Loop pacing and shutdown signalling
//! - [`runner`] - Main reconciliation loop
//! - [`bracket`] - Single-position bracket variant
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use split_trader::grid::{
//!     GridConfig, GridRunner, IntervalTicks, JsonSnapshotStore, LogNotifier, ShutdownSignal,
//! };
//!
//! let config = GridConfig::new("DOGE", 325.0, 20, 250.0).with_buy_margin(2.0);
//! let shutdown = ShutdownSignal::new();
//! shutdown.install_handlers();
//!
//! let mut runner = GridRunner::new(
//!     config.clone(),
//!     exchange,
//!     price_feed,
//!     IntervalTicks::new(shutdown.clone()),
//!     Arc::new(LogNotifier),
//!     Box::new(JsonSnapshotStore::new(&config.snapshot_path)),
//! )
//! .await?;
//! runner.run(&shutdown).await?;
//! ```
//!
//! # Testing
//!
//! ```rust,ignore
//! use split_trader::grid::executor::mock::{MockExchange, MockPriceFeed};
//!
//! let exchange = MockExchange::funded();
//! let price_feed = MockPriceFeed::new(97.0);
//! ```

pub mod bracket;
pub mod config;
pub mod errors;
pub mod executor;
pub mod manager;
pub mod notifier;
pub mod runner;
pub mod snapshot;
pub mod strategy;
pub mod ticks;
pub mod types;

// Re-export commonly used types
pub use bracket::{BracketConfig, BracketPhase, BracketState, BracketTrader};
pub use config::GridConfig;
pub use errors::{GridError, GridResult};
pub use executor::{GridExchange, PriceFeed};
pub use manager::GridManager;
pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
pub use runner::GridRunner;
pub use snapshot::{JsonSnapshotStore, LevelRecord, SnapshotStore};
pub use strategy::{LevelParams, Strategy, TickContext};
pub use ticks::{IntervalTicks, ShutdownSignal, TickSource};
pub use types::{
    BalanceSnapshot, FillReport, FillStatus, LevelStatus, OrderRef, OrderSide, OrderState,
};
