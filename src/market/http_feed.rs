//! Polling price feed over a public REST ticker endpoint

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::grid::errors::{GridError, GridResult};
use crate::grid::executor::PriceFeed;

/// Fetches `url` (with `{asset}` substituted) and reads the price found at
/// a JSON pointer, e.g. `/data/closing_price`. The value may be a number or
/// a numeric string.
pub struct HttpPriceFeed {
    client: reqwest::Client,
    url_template: String,
    pointer: String,
}

impl HttpPriceFeed {
    pub fn new(
        url_template: impl Into<String>,
        pointer: impl Into<String>,
        timeout: Duration,
    ) -> GridResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template: url_template.into(),
            pointer: pointer.into(),
        })
    }

    fn url_for(&self, asset: &str) -> String {
        self.url_template.replace("{asset}", asset)
    }
}

/// Read a positive price at `pointer` inside `body`
pub fn extract_price(body: &Value, pointer: &str) -> GridResult<f64> {
    let raw = body
        .pointer(pointer)
        .ok_or_else(|| GridError::MalformedResponse(format!("no value at {}", pointer)))?;

    let price = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| GridError::MalformedResponse(format!("not a price: {}", raw)))?;

    if !(price.is_finite() && price > 0.0) {
        return Err(GridError::MalformedResponse(format!("invalid price {}", price)));
    }
    Ok(price)
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn current_price(&self, asset: &str) -> GridResult<f64> {
        let url = self.url_for(asset);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(GridError::Http(format!("{} returned {}", url, resp.status())));
        }

        let body: Value = resp.json().await?;
        let price = extract_price(&body, &self.pointer)
            .map_err(|e| GridError::PriceUnavailable(format!("{}: {}", asset, e)))?;
        debug!("{} price {}", asset, price);
        Ok(price)
    }
}
