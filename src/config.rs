use config::{Config, Environment, File};
pub use config::ConfigError;
use serde::Deserialize;

use crate::grid::bracket::BracketConfig;
use crate::grid::config::GridConfig;
use crate::grid::errors::{GridError, GridResult};

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Which engine to run
    #[serde(default)]
    pub mode: Mode,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Alert delivery
    #[serde(default)]
    pub notifier: NotifierConfig,
    /// Where prices come from
    pub price_feed: PriceFeedConfig,
    /// Simulated account the bot trades against
    #[serde(default)]
    pub paper: PaperConfig,
    /// Ladder parameters, required in grid mode
    #[serde(default)]
    pub grid: Option<GridConfig>,
    /// Bracket parameters, required in bracket mode
    #[serde(default)]
    pub bracket: Option<BracketConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Grid,
    Bracket,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct NotifierConfig {
    /// Discord-style webhook; alerts only go to the log when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notifier_timeout")]
    pub timeout_secs: u64,
}

fn default_notifier_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
pub struct PriceFeedConfig {
    /// Ticker URL; `{asset}` is replaced by the traded asset
    pub url: String,
    /// JSON pointer to the price inside the response
    pub pointer: String,
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
}

fn default_feed_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_initial_cash")]
    pub initial_cash: f64,
    #[serde(default)]
    pub initial_asset: f64,
    #[serde(default)]
    pub initial_avg_cost: f64,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            initial_asset: 0.0,
            initial_avg_cost: 0.0,
            fee_rate: default_fee_rate(),
        }
    }
}

fn default_initial_cash() -> f64 {
    1_000_000.0
}

fn default_fee_rate() -> f64 {
    0.0004
}

impl Settings {
    /// Load settings from a configuration file
    pub fn new(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(config_path))
            // e.g. APP_NOTIFIER__WEBHOOK_URL=...
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Check that the section the selected mode needs is present and valid
    pub fn validate(&self) -> GridResult<()> {
        match self.mode {
            Mode::Grid => self
                .grid
                .as_ref()
                .ok_or_else(|| GridError::InvalidConfig("grid mode needs a [grid] section".into()))?
                .validate()?,
            Mode::Bracket => self
                .bracket
                .as_ref()
                .ok_or_else(|| {
                    GridError::InvalidConfig("bracket mode needs a [bracket] section".into())
                })?
                .validate()?,
        }

        if self.paper.initial_cash < 0.0 || self.paper.initial_asset < 0.0 {
            return Err(GridError::InvalidConfig("paper balances cannot be negative".into()));
        }
        Ok(())
    }

    /// Asset traded by the selected mode
    pub fn asset(&self) -> Option<&str> {
        match self.mode {
            Mode::Grid => self.grid.as_ref().map(|g| g.asset.as_str()),
            Mode::Bracket => self.bracket.as_ref().map(|b| b.asset.as_str()),
        }
    }
}
