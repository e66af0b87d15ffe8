//! Slack channel.
//!
//! Delivers messages through the Web API `chat.postMessage` method and owns
//! the signing secret Slack uses for interactive callbacks.

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    DeliveryError, Destination, Notification, NotificationChannel, SignedRequests, SigningSecret,
};

/// Default Slack Web API base URL.
pub const DEFAULT_API_URL: &str = "https://slack.com/api";

/// Slack channel options as resolved from settings.
#[derive(Clone, Default)]
pub struct SlackOptions {
    /// Bot token used for `chat.postMessage`
    pub token: Option<String>,
    /// Secret Slack signs interactive callbacks with
    pub signing_secret: Option<SigningSecret>,
    /// Web API base URL, overridable for tests and proxies
    pub api_url: Option<String>,
    /// Display name for posted messages
    pub username: Option<String>,
}

/// Slack notification channel.
pub struct SlackChannel {
    options: SlackOptions,
    client: Client,
}

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

#[derive(Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackChannel {
    pub fn new(options: SlackOptions, client: Client) -> Self {
        Self { options, client }
    }

    fn api_url(&self) -> &str {
        self.options.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }
}

impl fmt::Debug for SlackChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackChannel")
            .field("api_url", &self.api_url())
            .field("has_token", &self.options.token.is_some())
            .field("signing_secret", &self.options.signing_secret)
            .finish()
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn kind(&self) -> &'static str {
        "slack"
    }

    async fn deliver(
        &self,
        notification: &Notification,
        destination: &Destination,
    ) -> Result<(), DeliveryError> {
        let token = self
            .options
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DeliveryError::NotConfigured("slack token".to_string()))?;

        let url = format!("{}/chat.postMessage", self.api_url().trim_end_matches('/'));
        let body = PostMessage {
            channel: &destination.recipient,
            text: &notification.message,
            username: self.options.username.as_deref(),
        };

        let response: PostMessageResponse = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.ok {
            return Err(DeliveryError::Rejected {
                channel: destination.channel.clone(),
                reason: response.error.unwrap_or_else(|| "unknown_error".to_string()),
            });
        }

        info!(
            channel = %destination.channel,
            recipient = %destination.recipient,
            "slack_message_posted"
        );
        Ok(())
    }

    fn signed_requests(&self) -> Option<&dyn SignedRequests> {
        Some(self)
    }
}

impl SignedRequests for SlackChannel {
    fn signing_secret(&self) -> Option<&SigningSecret> {
        self.options
            .signing_secret
            .as_ref()
            .filter(|secret| !secret.is_empty())
    }
}
