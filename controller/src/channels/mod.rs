//! Notification channels.
//!
//! A channel is a named, configured notification service. Channels are
//! polymorphic over a small capability set:
//! - every channel can deliver a message (`NotificationChannel::deliver`)
//! - some channels can authenticate signed inbound requests
//!   (`NotificationChannel::signed_requests`)

pub mod console;
pub mod slack;
pub mod webhook;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use console::ConsoleChannel;
pub use slack::{SlackChannel, SlackOptions};
pub use webhook::WebhookChannel;

/// Errors raised while delivering a notification.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{channel} rejected the message: {reason}")]
    Rejected { channel: String, reason: String },

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("console write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared secret used to sign inbound requests for a channel.
///
/// The value never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(String);

impl SigningSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret bytes, used as the HMAC key.
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

/// Capability of channels whose provider signs the requests it sends us.
pub trait SignedRequests: Send + Sync {
    /// Secret configured for this channel, if any.
    fn signing_secret(&self) -> Option<&SigningSecret>;
}

/// A message to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
}

impl Notification {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Where a notification goes: a configured channel and a channel-specific recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination {
    pub channel: String,
    pub recipient: String,
}

impl Destination {
    pub fn new(channel: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            recipient: recipient.into(),
        }
    }

    /// Parse a `channel:recipient` string, e.g. `slack:deployments`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (channel, recipient) = raw.split_once(':')?;
        let channel = channel.trim();
        if channel.is_empty() {
            return None;
        }
        Some(Self::new(channel, recipient.trim()))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.recipient)
    }
}

/// A configured notification service.
#[async_trait]
pub trait NotificationChannel: Send + Sync + fmt::Debug {
    /// Short service type, e.g. `slack`.
    fn kind(&self) -> &'static str;

    /// Deliver a notification to a recipient of this channel.
    async fn deliver(
        &self,
        notification: &Notification,
        destination: &Destination,
    ) -> Result<(), DeliveryError>;

    /// Signed-request capability, for channels whose provider calls back into us.
    fn signed_requests(&self) -> Option<&dyn SignedRequests> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_parse() {
        assert_eq!(
            Destination::parse("slack:deployments"),
            Some(Destination::new("slack", "deployments"))
        );
        assert_eq!(
            Destination::parse("webhook: ops "),
            Some(Destination::new("webhook", "ops"))
        );
        assert_eq!(Destination::parse("no-separator"), None);
        assert_eq!(Destination::parse(":orphan"), None);
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(
            Destination::new("slack", "alerts").to_string(),
            "slack:alerts"
        );
    }

    #[test]
    fn test_signing_secret_debug_is_redacted() {
        let secret = SigningSecret::new("hunter2");
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(secret.expose(), b"hunter2");
    }
}
