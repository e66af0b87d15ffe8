//! Process configuration.
//!
//! Every flag can also be set through an environment variable. These values
//! are read once at startup; runtime settings (channels, secrets,
//! subscriptions) come from the settings files and are hot-reloaded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::warn;

use crate::controller::Scope;
use crate::supervisor::SupervisorOptions;

/// Namespace file mounted into every pod with a service account.
const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Application configuration loaded from flags and environment variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "notifications-controller", version, about)]
pub struct Config {
    /// Number of concurrent workers per controller
    #[arg(long, env = "PROCESSORS_COUNT", default_value_t = 1)]
    pub processors_count: usize,

    /// Namespace the controller handles. Current namespace if empty.
    #[arg(long, env = "NAMESPACE", default_value = "")]
    pub namespace: String,

    /// App label selector
    #[arg(long, env = "APP_LABEL_SELECTOR", default_value = "")]
    pub app_label_selector: String,

    /// Logging level, used when RUST_LOG is unset. One of: debug|info|warn|error
    #[arg(long = "loglevel", env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Port serving /metrics
    #[arg(long, env = "METRICS_PORT", default_value_t = 9001)]
    pub metrics_port: u16,

    /// Port serving webhook callbacks
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Settings document to watch
    #[arg(long, env = "CONFIG_PATH", default_value = "/app/config/settings.yaml")]
    pub config_path: PathBuf,

    /// Secrets document referenced by `$key` settings values
    #[arg(long, env = "SECRETS_PATH")]
    pub secrets_path: Option<PathBuf>,

    /// Seconds between settings file polls
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Maximum age in seconds for webhook request timestamps
    #[arg(long, env = "SIGNATURE_MAX_AGE_SECS", default_value_t = 300)]
    pub signature_max_age_secs: u64,

    /// Seconds to wait for controllers to stop on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Capacity of the webhook intake queue
    #[arg(long, env = "INTAKE_CAPACITY", default_value_t = 1024)]
    pub intake_capacity: usize,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn signature_max_age(&self) -> Duration {
        Duration::from_secs(self.signature_max_age_secs)
    }

    /// Resource scope, resolving an empty namespace to the pod's own.
    pub fn scope(&self) -> Scope {
        Scope {
            namespace: resolve_namespace(&self.namespace, Path::new(SERVICE_ACCOUNT_NAMESPACE)),
            label_selector: self.app_label_selector.clone(),
        }
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            scope: self.scope(),
            parallelism: self.processors_count.max(1),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

/// Use `configured` when set, else the service-account namespace file, else `default`.
fn resolve_namespace(configured: &str, service_account_file: &Path) -> String {
    if !configured.trim().is_empty() {
        return configured.trim().to_string();
    }
    match std::fs::read_to_string(service_account_file) {
        Ok(ns) if !ns.trim().is_empty() => ns.trim().to_string(),
        _ => {
            warn!(
                file = %service_account_file.display(),
                "namespace_not_detected_using_default"
            );
            "default".to_string()
        }
    }
}
