//! Notification channels.

use crate::config::ChannelConfig;
use crate::core::{Error, Result};
use crate::notify::message::{Notification, Severity};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// A delivery target for notifications.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name, unique per dispatcher.
    fn name(&self) -> &str;

    /// Deliver one message.
    async fn send(&self, message: &Notification) -> Result<()>;
}

/// JSON POST to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    name: String,
    url: String,
    client: Client,
}

impl WebhookChannel {
    /// Create a webhook channel.
    pub fn new(name: &str, url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("channel {}: {}", name, e)))?;
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| Error::NotificationDelivery {
                channel: self.name.clone(),
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::NotificationDelivery {
                channel: self.name.clone(),
                reason: format!("status {}", response.status()),
            })
        }
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Notification) -> Result<()> {
        match message.severity {
            Severity::Info => info!(
                channel = %self.name,
                dedup_key = %message.dedup_key,
                title = %message.title,
                "{}", message.body
            ),
            Severity::Warning => warn!(
                channel = %self.name,
                dedup_key = %message.dedup_key,
                title = %message.title,
                "{}", message.body
            ),
            Severity::Critical => error!(
                channel = %self.name,
                dedup_key = %message.dedup_key,
                title = %message.title,
                "{}", message.body
            ),
        }
        Ok(())
    }
}

/// Build channels from configuration.
pub fn channels_from_config(configs: &[ChannelConfig]) -> Result<Vec<Arc<dyn NotificationChannel>>> {
    configs
        .iter()
        .map(|c| -> Result<Arc<dyn NotificationChannel>> {
            match c {
                ChannelConfig::Webhook { name, url } => Ok(Arc::new(WebhookChannel::new(name, url)?)),
                ChannelConfig::Log { name } => Ok(Arc::new(LogChannel::new(name))),
            }
        })
        .collect()
}
