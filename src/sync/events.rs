//! Outward notifications of the sync engine.
//!
//! This module defines the notification types, the handler trait, and the dispatcher that fans a
//! notification out to every registered sink. Notifications are fire-and-forget: a failing sink
//! is logged and never affects ingestion or the other sinks.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Kinds of notification the engine emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// A channel was seen for the first time and initialized
    NewChannel,
    /// A configuration block changed a channel's topology
    UpdateChannel,
    /// A channel name already exists under a different genesis hash
    ExistingChannelConflict,
    /// A chaincode lifecycle transaction was committed
    Chaincode,
    /// A block was persisted
    Block,
}

/// Details of a persisted block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockNotice {
    pub title: String,
    pub message: String,
    pub time: Option<String>,
    pub txcount: u64,
    pub datahash: String,
    pub blocknum: u64,
}

impl BlockNotice {
    pub fn new(
        channel_name: &str,
        number: u64,
        txcount: u64,
        datahash: String,
        time: Option<String>,
    ) -> Self {
        Self {
            title: format!("Block {} added to Channel: {}", number, channel_name),
            message: format!("Block {} established with {} tx", number, txcount),
            time,
            txcount,
            datahash,
            blocknum: number,
        }
    }
}

/// A notification as delivered to sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub network_name: String,
    pub client_name: String,
    pub channel_name: String,
    #[serde(flatten)]
    pub block: Option<BlockNotice>,
}

/// Trait for notification sinks.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Deliver a notification.
    async fn handle(&self, notification: &Notification) -> Result<(), NotificationError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Error types for notification sinks
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Webhook error: {0}")]
    Webhook(#[from] reqwest::Error),
}

/// Dispatcher that manages multiple notification sinks.
///
/// It also carries the network and client names stamped onto every notification.
pub struct NotificationDispatcher {
    network_name: String,
    client_name: String,
    handlers: Vec<Arc<dyn NotificationHandler>>,
}

impl NotificationDispatcher {
    pub fn new(network_name: String, client_name: String) -> Self {
        Self {
            network_name,
            client_name,
            handlers: Vec::new(),
        }
    }

    /// Register a new handler. Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Arc<dyn NotificationHandler>) {
        self.handlers.push(handler);
    }

    pub fn notification(&self, kind: NotificationKind, channel_name: &str) -> Notification {
        Notification {
            kind,
            network_name: self.network_name.clone(),
            client_name: self.client_name.clone(),
            channel_name: channel_name.to_string(),
            block: None,
        }
    }

    /// Dispatch a notification to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&self, notification: Notification) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle(&notification).await {
                error!(
                    "Handler {} failed to deliver {:?} notification: {}",
                    handler.name(),
                    notification.kind,
                    e
                );
            }
        }
    }

    pub async fn notify(&self, kind: NotificationKind, channel_name: &str) {
        self.dispatch(self.notification(kind, channel_name)).await;
    }
}

/// Sink that writes notifications to the log
pub struct LogNotifier;

#[async_trait]
impl NotificationHandler for LogNotifier {
    async fn handle(&self, notification: &Notification) -> Result<(), NotificationError> {
        match &notification.block {
            Some(block) => info!(
                "[{}] {} ({})",
                notification.network_name, block.title, block.message
            ),
            None => info!(
                "[{}] {:?} for channel {}",
                notification.network_name, notification.kind, notification.channel_name
            ),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Sink that POSTs notifications as JSON to a webhook.
///
/// Delivery runs on a spawned task so a slow endpoint never holds up ingestion.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl NotificationHandler for WebhookNotifier {
    async fn handle(&self, notification: &Notification) -> Result<(), NotificationError> {
        let request = self.client.post(&self.url).json(notification);
        let url = self.url.clone();
        tokio::spawn(async move {
            match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => {}
                Err(e) => error!("Webhook delivery to {} failed: {}", url, e),
            }
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
