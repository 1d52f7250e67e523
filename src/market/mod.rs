//! Market adapters
//!
//! Concrete implementations of the grid collaborator traits:
//!
//! - [`HttpPriceFeed`] polls a public REST ticker for the current price
//! - [`PaperTradingMarket`] simulates order execution against observed
//!   prices, acting as both exchange and price feed

mod http_feed;
mod paper_trading_market;

pub use http_feed::{extract_price, HttpPriceFeed};
pub use paper_trading_market::{PaperPosition, PaperTradingMarket, PaperTradingMarketInput};
