//! Runtime settings snapshots.
//!
//! A [`Settings`] value is one immutable version of the controller's runtime
//! configuration: the configured notification channels and the default
//! subscriptions. Every configuration change produces a new value; the
//! supervisor shares it downstream as `Arc<Settings>`.

pub mod loader;
pub mod source;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::channels::{Destination, NotificationChannel, SigningSecret};

pub use loader::parse_settings;
pub use source::{ChannelSource, ConfigSource, FileSource};

/// Errors raised while observing or parsing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("service {service} references missing secret key {key}")]
    MissingSecret { service: String, key: String },

    #[error("invalid recipient {0:?}, expected <channel>:<recipient>")]
    InvalidRecipient(String),
}

/// Result of looking up a channel's signing secret.
#[derive(Debug, Clone, Copy)]
pub enum SigningKey<'a> {
    /// No channel with that name exists.
    NotConfigured,
    /// The channel exists but has no usable secret.
    Missing,
    Present(&'a SigningSecret),
}

/// Channel name to channel mapping. Lookups are exact and case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel, returning the one it replaced.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.insert(name.into(), channel)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn NotificationChannel>> {
        self.channels.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Signing secret lookup, distinguishing "no channel" from "no secret".
    pub fn signing_key(&self, name: &str) -> SigningKey<'_> {
        let Some(channel) = self.channels.get(name) else {
            return SigningKey::NotConfigured;
        };
        match channel
            .signed_requests()
            .and_then(|signed| signed.signing_secret())
            .filter(|secret| !secret.is_empty())
        {
            Some(secret) => SigningKey::Present(secret),
            None => SigningKey::Missing,
        }
    }
}

/// A set of recipients notified by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub destinations: Vec<Destination>,
}

/// One version of the runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    revision: String,
    registry: ChannelRegistry,
    subscriptions: Vec<Subscription>,
}

impl Settings {
    pub fn new(
        revision: impl Into<String>,
        registry: ChannelRegistry,
        subscriptions: Vec<Subscription>,
    ) -> Self {
        Self {
            revision: revision.into(),
            registry,
            subscriptions,
        }
    }

    /// Identifier of the configuration content this snapshot was built from.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Every destination named by any subscription.
    pub fn destinations(&self) -> impl Iterator<Item = &Destination> {
        self.subscriptions.iter().flat_map(|s| s.destinations.iter())
    }

    /// Consume this snapshot and return it with `channel` registered under
    /// `name`, replacing any externally configured channel of that name.
    ///
    /// Returns the augmented snapshot and whether an existing entry was replaced.
    pub fn with_channel(
        mut self,
        name: &str,
        channel: Arc<dyn NotificationChannel>,
    ) -> (Self, bool) {
        let replaced = self.registry.insert(name, channel).is_some();
        (self, replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ConsoleChannel, SlackChannel, SlackOptions};

    fn slack(secret: Option<&str>) -> Arc<dyn NotificationChannel> {
        Arc::new(SlackChannel::new(
            SlackOptions {
                signing_secret: secret.map(SigningSecret::new),
                ..Default::default()
            },
            reqwest::Client::new(),
        ))
    }

    #[test]
    fn test_signing_key_states() {
        let mut registry = ChannelRegistry::new();
        registry.insert("slack", slack(Some("secret")));
        registry.insert("empty", slack(Some("")));
        registry.insert("bare", slack(None));
        registry.insert("console", Arc::new(ConsoleChannel::new(std::io::sink())));

        assert!(matches!(registry.signing_key("slack"), SigningKey::Present(_)));
        assert!(matches!(registry.signing_key("empty"), SigningKey::Missing));
        assert!(matches!(registry.signing_key("bare"), SigningKey::Missing));
        assert!(matches!(registry.signing_key("console"), SigningKey::Missing));
        assert!(matches!(registry.signing_key("absent"), SigningKey::NotConfigured));
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let mut registry = ChannelRegistry::new();
        registry.insert("slack", slack(Some("secret")));
        assert!(registry.contains("slack"));
        assert!(!registry.contains("Slack"));
        assert!(matches!(registry.signing_key("SLACK"), SigningKey::NotConfigured));
    }

    #[test]
    fn test_with_channel_replaces_existing() {
        let mut registry = ChannelRegistry::new();
        registry.insert("console", slack(Some("x")));
        let settings = Settings::new("r1", registry, Vec::new());

        let (settings, replaced) =
            settings.with_channel("console", Arc::new(ConsoleChannel::new(std::io::sink())));

        assert!(replaced);
        assert_eq!(settings.registry().get("console").unwrap().kind(), "console");
        assert_eq!(settings.revision(), "r1");
    }
}
