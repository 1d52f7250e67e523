//! Best-effort operator alerts

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use log::{error, info, warn};
use serde::Serialize;

use super::errors::GridResult;

/// Alert sink. Delivery is best-effort: implementations log their own
/// failures and never surface them to the trading logic.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Writes alerts to the log; used when no webhook is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) {
        info!("[notify] {}", text);
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

/// Posts alerts to a Discord-style webhook as `{"content": "..."}`
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> GridResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn format(text: &str) -> String {
        format!("[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), text)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, text: &str) {
        let content = Self::format(text);
        let payload = WebhookPayload { content: &content };

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Webhook rejected alert: HTTP {}", resp.status()),
            Err(e) => error!("Failed to send webhook alert: {}", e),
        }
    }
}

/// Recording notifier for tests
pub mod mock {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default, Clone)]
    pub struct RecordingNotifier {
        pub messages: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn messages(&self) -> Vec<String> {
            self.messages.lock().await.clone()
        }

        pub async fn count_containing(&self, needle: &str) -> usize {
            self.messages
                .lock()
                .await
                .iter()
                .filter(|m| m.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) {
            self.messages.lock().await.push(text.to_string());
        }
    }
}
