//! Configuration sources.
//!
//! A [`ConfigSource`] yields settings snapshots in the order it observes them.
//! An error from the source ends the watch; retry policy, if any, lives inside
//! the source itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{parse_settings, Settings, SettingsError};

/// Something that observes configuration over time.
#[async_trait]
pub trait ConfigSource: Send {
    /// Wait for the next distinct configuration.
    ///
    /// Returns `Ok(None)` once the source has nothing more to deliver.
    /// Must be cancel-safe: dropping the future must not lose a snapshot that
    /// was not yet returned.
    async fn next_snapshot(&mut self) -> Result<Option<Settings>, SettingsError>;
}

// =============================================================================
// File Source
// =============================================================================

/// Polls a settings file and an optional secrets file.
///
/// A snapshot is emitted on the first poll and then whenever the combined
/// content digest changes.
pub struct FileSource {
    settings_path: PathBuf,
    secrets_path: Option<PathBuf>,
    interval: Duration,
    client: Client,
    last_digest: Option<String>,
}

impl FileSource {
    pub fn new(
        settings_path: impl Into<PathBuf>,
        secrets_path: Option<PathBuf>,
        interval: Duration,
        client: Client,
    ) -> Self {
        Self {
            settings_path: settings_path.into(),
            secrets_path,
            interval,
            client,
            last_digest: None,
        }
    }

    async fn read(path: &Path) -> Result<String, SettingsError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })
    }

    /// A missing secrets file means "no secrets"; other read errors are fatal.
    async fn read_secrets(&self) -> Result<Option<String>, SettingsError> {
        let Some(path) = &self.secrets_path else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SettingsError::Read {
                path: path.clone(),
                source,
            }),
        }
    }
}

/// Hex SHA-256 over both documents, separated so moving bytes between them
/// changes the digest.
fn content_digest(settings: &str, secrets: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(settings.as_bytes());
    hasher.update([0u8]);
    if let Some(secrets) = secrets {
        hasher.update(secrets.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn next_snapshot(&mut self) -> Result<Option<Settings>, SettingsError> {
        loop {
            if self.last_digest.is_some() {
                tokio::time::sleep(self.interval).await;
            }

            let settings = Self::read(&self.settings_path).await?;
            let secrets = self.read_secrets().await?;
            let digest = content_digest(&settings, secrets.as_deref());

            if self.last_digest.as_deref() == Some(digest.as_str()) {
                debug!(path = %self.settings_path.display(), "settings_unchanged");
                continue;
            }

            let revision = &digest[..12];
            let snapshot = parse_settings(revision, &settings, secrets.as_deref(), &self.client)?;
            info!(
                path = %self.settings_path.display(),
                revision = %revision,
                channels = snapshot.registry().len(),
                "settings_observed"
            );
            self.last_digest = Some(digest);
            return Ok(Some(snapshot));
        }
    }
}

// =============================================================================
// Channel Source
// =============================================================================

/// Source fed by snapshots pushed through an mpsc channel.
///
/// Useful when configuration is produced in-process (embedding, tests).
pub struct ChannelSource {
    rx: mpsc::Receiver<Settings>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it.
    pub fn new(capacity: usize) -> (mpsc::Sender<Settings>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl ConfigSource for ChannelSource {
    async fn next_snapshot(&mut self) -> Result<Option<Settings>, SettingsError> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL: Duration = Duration::from_millis(10);

    #[test]
    fn test_digest_separates_documents() {
        assert_ne!(content_digest("ab", Some("c")), content_digest("a", Some("bc")));
        assert_eq!(content_digest("a", None), content_digest("a", Some("")));
    }

    #[tokio::test]
    async fn test_file_source_emits_on_change_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let hook = "services:\n  hook:\n    type: webhook\n    url: http://a\n";
        std::fs::write(&path, hook).unwrap();

        let mut source = FileSource::new(&path, None, POLL, Client::new());

        let first = source.next_snapshot().await.unwrap().unwrap();
        assert!(first.registry().contains("hook"));

        // Unchanged content keeps the source waiting.
        let pending =
            tokio::time::timeout(Duration::from_millis(50), source.next_snapshot()).await;
        assert!(pending.is_err());

        let other = "services:\n  other:\n    type: webhook\n    url: http://b\n";
        std::fs::write(&path, other).unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), source.next_snapshot())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(second.registry().contains("other"));
        assert_ne!(first.revision(), second.revision());
    }

    #[tokio::test]
    async fn test_file_source_reloads_on_secret_change() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.yaml");
        let secrets = dir.path().join("secrets.yaml");
        let slack = "services:\n  slack:\n    type: slack\n    signingSecret: $key\n";
        std::fs::write(&settings, slack).unwrap();
        std::fs::write(&secrets, "key: one\n").unwrap();

        let mut source = FileSource::new(&settings, Some(secrets.clone()), POLL, Client::new());
        let first = source.next_snapshot().await.unwrap().unwrap();

        std::fs::write(&secrets, "key: two\n").unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), source.next_snapshot())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_ne!(first.revision(), second.revision());
    }

    #[tokio::test]
    async fn test_file_source_missing_settings_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FileSource::new(dir.path().join("absent.yaml"), None, POLL, Client::new());
        let err = source.next_snapshot().await.unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[tokio::test]
    async fn test_file_source_missing_secrets_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.yaml");
        std::fs::write(&settings, "services: {}\n").unwrap();

        let mut source = FileSource::new(
            &settings,
            Some(dir.path().join("secrets.yaml")),
            POLL,
            Client::new(),
        );
        assert!(source.next_snapshot().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_channel_source_preserves_order_and_ends() {
        let (tx, mut source) = ChannelSource::new(4);
        for rev in ["c1", "c2", "c3"] {
            tx.send(Settings::new(rev, Default::default(), Vec::new()))
                .await
                .unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(settings) = source.next_snapshot().await.unwrap() {
            seen.push(settings.revision().to_string());
        }
        assert_eq!(seen, vec!["c1", "c2", "c3"]);
    }
}
