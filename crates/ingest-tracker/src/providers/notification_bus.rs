//! Outbound bus for domain notifications

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::types::DomainNotification;

/// Publishes domain notifications to downstream consumers
#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn publish(&self, notification: &DomainNotification) -> Result<()>;

    /// Bus name for logging
    fn name(&self) -> &str;
}

/// In-process fan-out over a tokio broadcast channel
pub struct BroadcastBus {
    sender: broadcast::Sender<DomainNotification>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainNotification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl NotificationBus for BroadcastBus {
    async fn publish(&self, notification: &DomainNotification) -> Result<()> {
        // No subscribers is not a failure
        if self.sender.send(notification.clone()).is_err() {
            tracing::debug!(
                "No subscribers for {} ({})",
                notification.subject(),
                notification.document_id()
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "broadcast"
    }
}

/// POSTs each notification as JSON to a webhook
pub struct WebhookBus {
    client: reqwest::Client,
    url: String,
}

impl WebhookBus {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build webhook client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationBus for WebhookBus {
    async fn publish(&self, notification: &DomainNotification) -> Result<()> {
        let body = json!({
            "subject": notification.subject(),
            "notification": notification,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("webhook unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Notification(format!(
                "webhook answered {} for {}",
                response.status(),
                notification.subject()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Publishes to every inner bus; fails if any of them failed
pub struct FanoutBus {
    buses: Vec<Arc<dyn NotificationBus>>,
}

impl FanoutBus {
    pub fn new(buses: Vec<Arc<dyn NotificationBus>>) -> Self {
        Self { buses }
    }
}

#[async_trait]
impl NotificationBus for FanoutBus {
    async fn publish(&self, notification: &DomainNotification) -> Result<()> {
        let mut failures = Vec::new();
        for bus in &self.buses {
            if let Err(e) = bus.publish(notification).await {
                failures.push(format!("{}: {}", bus.name(), e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Notification(failures.join("; ")))
        }
    }

    fn name(&self) -> &str {
        "fanout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn progress() -> DomainNotification {
        DomainNotification::DocumentProgress {
            document_id: "b/a.pdf@v1".to_string(),
            indexed_units: 1,
            total_units: 2,
        }
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let bus = BroadcastBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(&progress()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), progress());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let bus = BroadcastBus::new(8);
        assert!(bus.publish(&progress()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_posts_subject_and_body() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let router = Router::new().route(
            "/hook",
            post(move |Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let bus = WebhookBus::new(format!("http://{}/hook", addr)).unwrap();
        bus.publish(&progress()).await.unwrap();

        let body = rx.recv().await.unwrap();
        assert_eq!(body["subject"], "document.progress");
        assert_eq!(body["notification"]["event"], "document_progress");
        assert_eq!(body["notification"]["indexed_units"], 1);
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_notification_error() {
        let bus = WebhookBus::new("http://127.0.0.1:9/hook").unwrap();
        let err = bus.publish(&progress()).await.unwrap_err();
        assert!(err.is_soft());
    }
}
