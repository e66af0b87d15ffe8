//! Generic webhook channel: POSTs a JSON document to a configured URL.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use super::{DeliveryError, Destination, Notification, NotificationChannel};

/// Outbound webhook notification channel.
#[derive(Debug)]
pub struct WebhookChannel {
    url: String,
    headers: BTreeMap<String, String>,
    client: Client,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    recipient: &'a str,
    message: &'a str,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, headers: BTreeMap<String, String>, client: Client) -> Self {
        Self {
            url: url.into(),
            headers,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(
        &self,
        notification: &Notification,
        destination: &Destination,
    ) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.url).json(&WebhookPayload {
            recipient: &destination.recipient,
            message: &notification.message,
        });

        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                channel: destination.channel.clone(),
                reason: format!("status {}", status.as_u16()),
            });
        }

        info!(
            channel = %destination.channel,
            recipient = %destination.recipient,
            status_code = status.as_u16(),
            "webhook_notification_sent"
        );
        Ok(())
    }
}
