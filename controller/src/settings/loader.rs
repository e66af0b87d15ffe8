//! Settings document parsing.
//!
//! Settings come from two YAML documents, mirroring a Kubernetes ConfigMap and
//! Secret pair:
//!
//! ```yaml
//! # settings.yaml
//! services:
//!   slack:
//!     type: slack
//!     token: $slack-token
//!     signingSecret: $slack-signing-secret
//!   alerts:
//!     type: webhook
//!     url: https://example.com/hook
//! subscriptions:
//!   - recipients: [slack:deployments]
//! ```
//!
//! ```yaml
//! # secrets.yaml
//! slack-token: xoxb-...
//! slack-signing-secret: 8f742231b10e8888abcd99yyyzzz85a5
//! ```
//!
//! Any service field starting with `$` is resolved against the secrets map.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;

use super::{ChannelRegistry, Settings, SettingsError, Subscription};
use crate::channels::{Destination, SigningSecret, SlackChannel, SlackOptions, WebhookChannel};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsDocument {
    #[serde(default)]
    services: BTreeMap<String, ServiceSpec>,
    #[serde(default)]
    subscriptions: Vec<SubscriptionSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServiceSpec {
    Slack(SlackSpec),
    Webhook(WebhookSpec),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlackSpec {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    signing_secret: Option<String>,
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookSpec {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionSpec {
    #[serde(default)]
    recipients: Vec<String>,
}

/// Parse a settings document and its optional secrets document.
///
/// # Arguments
///
/// * `revision` - Identifier stamped on the resulting snapshot
/// * `settings_yaml` - The settings document
/// * `secrets_yaml` - Flat key/value secrets map, if present
/// * `client` - HTTP client shared by the outbound channels
pub fn parse_settings(
    revision: &str,
    settings_yaml: &str,
    secrets_yaml: Option<&str>,
    client: &Client,
) -> Result<Settings, SettingsError> {
    let document: SettingsDocument = if settings_yaml.trim().is_empty() {
        SettingsDocument::default()
    } else {
        serde_yaml::from_str(settings_yaml)?
    };

    let secrets: BTreeMap<String, String> = match secrets_yaml {
        Some(raw) if !raw.trim().is_empty() => serde_yaml::from_str(raw)?,
        _ => BTreeMap::new(),
    };

    let mut registry = ChannelRegistry::new();
    for (name, spec) in document.services {
        let resolve = |value: Option<String>| resolve_secret(&name, value, &secrets);
        match spec {
            ServiceSpec::Slack(slack) => {
                let options = SlackOptions {
                    token: resolve(slack.token)?,
                    signing_secret: resolve(slack.signing_secret)?.map(SigningSecret::new),
                    api_url: slack.api_url,
                    username: slack.username,
                };
                registry.insert(name.clone(), Arc::new(SlackChannel::new(options, client.clone())));
            }
            ServiceSpec::Webhook(webhook) => {
                let url = resolve(Some(webhook.url))?.unwrap_or_default();
                let mut headers = BTreeMap::new();
                for (key, value) in webhook.headers {
                    headers.insert(key, resolve(Some(value))?.unwrap_or_default());
                }
                registry.insert(
                    name.clone(),
                    Arc::new(WebhookChannel::new(url, headers, client.clone())),
                );
            }
        }
    }

    let subscriptions = document
        .subscriptions
        .into_iter()
        .map(|spec| {
            let destinations = spec
                .recipients
                .iter()
                .map(|raw| {
                    Destination::parse(raw)
                        .ok_or_else(|| SettingsError::InvalidRecipient(raw.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Subscription { destinations })
        })
        .collect::<Result<Vec<_>, SettingsError>>()?;

    Ok(Settings::new(revision, registry, subscriptions))
}

/// Resolve a `$key` reference against the secrets map; literals pass through.
fn resolve_secret(
    service: &str,
    value: Option<String>,
    secrets: &BTreeMap<String, String>,
) -> Result<Option<String>, SettingsError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.strip_prefix('$') {
        Some(key) => secrets
            .get(key)
            .cloned()
            .map(Some)
            .ok_or_else(|| SettingsError::MissingSecret {
                service: service.to_string(),
                key: key.to_string(),
            }),
        None => Ok(Some(value)),
    }
}
