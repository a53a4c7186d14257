use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::Sink;
use crate::config::Config;
use crate::error::{DeliveryError, DeliveryFailure};
use crate::message::TrackableMessage;

/// POSTs every message as JSON to each configured URL concurrently
pub struct WebhookSink {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl WebhookSink {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            urls: Vec::new(),
        }
    }

    async fn deliver(&self, url: &str, body: Vec<u8>) -> Result<(), DeliveryFailure> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryFailure {
                url: url.to_string(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DeliveryFailure {
                url: url.to_string(),
                cause: status.to_string(),
            });
        }

        debug!("Webhook delivered to {}", url);
        Ok(())
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn init(&mut self, config: &Config) -> Result<()> {
        self.urls = config.webhook.urls.clone();
        if self.urls.is_empty() {
            warn!("Webhook sink enabled without any URLs");
        }
        Ok(())
    }

    async fn track_message(&self, message: &mut TrackableMessage) -> Result<()> {
        let body = serde_json::to_vec(&*message).context("Failed to serialize message")?;

        let attempts = self.urls.iter().map(|url| self.deliver(url, body.clone()));
        let failures: Vec<DeliveryFailure> = join_all(attempts)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError { failures }.into())
        }
    }
}
