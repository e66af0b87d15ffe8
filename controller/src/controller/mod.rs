//! Controller interfaces.
//!
//! The supervisor only knows controllers through these traits: a factory
//! builds one from a settings snapshot, `init` prepares it, and `run` drives
//! it until its cancellation token fires.

pub mod intake;
pub mod notifications;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::settings::Settings;

pub use intake::{InboundCommand, IntakeError, IntakeQueue};
pub use notifications::{NotificationController, NotificationControllerFactory};

/// Errors raised while building or initialising a controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("subscription targets unknown channel {0}")]
    UnknownChannel(String),

    #[error("namespace scope is empty")]
    EmptyNamespace,

    #[error("initialisation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Resource scope a controller works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub namespace: String,
    /// Extra label selector applied on top of the namespace
    pub label_selector: String,
}

/// A running unit of reconciliation work.
#[async_trait]
pub trait Controller: Send {
    /// Prepare the controller. Awaited before `run` is spawned.
    async fn init(&mut self, token: &CancellationToken) -> Result<(), ControllerError>;

    /// Run until `token` is cancelled, using `parallelism` concurrent workers.
    async fn run(self: Box<Self>, token: CancellationToken, parallelism: usize);
}

/// Builds controllers from settings snapshots.
pub trait ControllerFactory: Send + Sync {
    fn build(
        &self,
        settings: Arc<Settings>,
        scope: &Scope,
        metrics: &Metrics,
    ) -> Result<Box<dyn Controller>, ControllerError>;
}
