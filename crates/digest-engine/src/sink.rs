use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use digest_core::config::{DeliveryConfig, DeliveryMode};

use crate::report::chunk_text;

/// Why a delivery failed.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("delivery request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Where finished reports go.
///
/// Delivery failures are logged by callers and never escalate into an
/// aggregation failure.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<(), SinkError>;
}

/// Prints reports to stdout.
pub struct ConsoleSink;

#[async_trait]
impl DeliverySink for ConsoleSink {
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<(), SinkError> {
        println!("--- chat {chat_id} ---");
        println!("{text}");
        Ok(())
    }
}

/// POSTs `{"chat_id", "part", "parts", "text"}` JSON to a fixed URL,
/// splitting texts longer than `max_chunk_chars` into sequential posts.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    max_chunk_chars: usize,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, max_chunk_chars: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            max_chunk_chars,
        }
    }
}

#[async_trait]
impl DeliverySink for WebhookSink {
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<(), SinkError> {
        let chunks = chunk_text(text, self.max_chunk_chars);
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let response = self
                .client
                .post(&self.url)
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "part": i + 1,
                    "parts": total,
                    "text": chunk,
                }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(SinkError::Rejected(format!("HTTP {}", response.status())));
            }
            debug!("delivered part {}/{} to chat {}", i + 1, total, chat_id);
        }
        Ok(())
    }
}

/// Build the configured sink. Webhook mode without a URL logs a warning
/// and falls back to the console.
pub fn sink_from_config(config: &DeliveryConfig) -> Arc<dyn DeliverySink> {
    match config.mode {
        DeliveryMode::Console => Arc::new(ConsoleSink),
        DeliveryMode::Webhook => match &config.webhook_url {
            Some(url) => Arc::new(WebhookSink::new(url.clone(), config.max_chunk_chars)),
            None => {
                warn!("delivery mode is webhook but webhook_url is unset, printing to stdout");
                Arc::new(ConsoleSink)
            }
        },
    }
}
