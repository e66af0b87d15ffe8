//! Configuration watch and hot-reload supervisor.
//!
//! The supervisor owns the single active controller. For every snapshot a
//! [`ConfigSource`] delivers it:
//! 1. Cancels the active controller (a request, not a wait)
//! 2. Injects the diagnostic `console` channel into the snapshot
//! 3. Builds a new controller from the augmented snapshot
//! 4. Awaits the new controller's `init`
//! 5. Spawns the new controller's `run` with a fresh cancellation token
//!
//! Any error while applying a snapshot is fatal and returned from
//! [`Supervisor::run`]. A failed reload does not resume the previous
//! controller: it has already been told to stop.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::channels::{ConsoleChannel, NotificationChannel};
use crate::controller::{ControllerError, ControllerFactory, Scope};
use crate::metrics::Metrics;
use crate::settings::{ConfigSource, Settings, SettingsError};

/// Name of the locally injected diagnostic channel.
pub const DIAGNOSTIC_CHANNEL: &str = "console";

/// Errors that stop the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("config source failed: {0}")]
    Source(#[from] SettingsError),

    #[error("failed to build controller for settings {revision}: {source}")]
    Build {
        revision: String,
        #[source]
        source: ControllerError,
    },

    #[error("failed to initialise controller for settings {revision}: {source}")]
    Init {
        revision: String,
        #[source]
        source: ControllerError,
    },
}

/// Tunables for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub scope: Scope,
    /// Worker count handed to each controller's `run`
    pub parallelism: usize,
    /// How long shutdown waits for controllers to wind down
    pub shutdown_grace: Duration,
}

/// The controller currently running.
struct ActiveController {
    generation: u64,
    revision: String,
    token: CancellationToken,
}

/// Owner of the active controller and its hot-reload lifecycle.
///
/// Only the supervisor's own methods touch the active handle, and snapshots
/// are applied one at a time through `&mut self`.
pub struct Supervisor<F> {
    factory: F,
    options: SupervisorOptions,
    metrics: Metrics,
    diagnostic: Arc<dyn NotificationChannel>,
    root: CancellationToken,
    active: Option<ActiveController>,
    controllers: JoinSet<()>,
    generation: u64,
    published: watch::Sender<Arc<Settings>>,
}

impl<F: ControllerFactory> Supervisor<F> {
    pub fn new(factory: F, options: SupervisorOptions, metrics: Metrics) -> Self {
        let (published, _) = watch::channel(Arc::new(Settings::default()));
        Self {
            factory,
            options,
            metrics,
            diagnostic: Arc::new(ConsoleChannel::stdout()),
            root: CancellationToken::new(),
            active: None,
            controllers: JoinSet::new(),
            generation: 0,
            published,
        }
    }

    /// Replace the diagnostic channel injected into every snapshot.
    pub fn with_diagnostic_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.diagnostic = channel;
        self
    }

    /// Observe the augmented snapshot of the active controller.
    ///
    /// Starts out as an empty snapshot until the first one is applied.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.published.subscribe()
    }

    /// Generation of the active controller, if any.
    pub fn active_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|active| active.generation)
    }

    /// Controller tasks spawned and not yet reaped, active one included.
    pub fn outstanding_controllers(&self) -> usize {
        self.controllers.len()
    }

    /// Apply snapshots from `source` until it ends, fails, or `shutdown` fires.
    ///
    /// When the source is exhausted the active controller keeps running until
    /// `shutdown`. Controllers are given `shutdown_grace` to stop before
    /// this returns.
    pub async fn run<S: ConfigSource>(
        mut self,
        mut source: S,
        shutdown: CancellationToken,
    ) -> Result<(), SupervisorError> {
        info!("supervisor_started");

        let result = loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                next = source.next_snapshot() => next,
            };

            match next {
                Ok(Some(settings)) => {
                    // A controller stuck in `init` must not block shutdown.
                    let applied = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            warn!("shutdown_during_settings_apply");
                            break Ok(());
                        }
                        applied = self.apply(settings) => applied,
                    };
                    if let Err(e) = applied {
                        error!(error = %e, "settings_apply_failed");
                        break Err(e);
                    }
                }
                Ok(None) => {
                    info!("config_source_exhausted");
                    shutdown.cancelled().await;
                    break Ok(());
                }
                Err(e) => {
                    error!(error = %e, "config_source_failed");
                    break Err(e.into());
                }
            }
        };

        self.shutdown().await;
        result
    }

    /// Apply one settings snapshot.
    pub async fn apply(&mut self, settings: Settings) -> Result<(), SupervisorError> {
        if let Some(previous) = self.active.take() {
            info!(
                generation = previous.generation,
                revision = %previous.revision,
                "settings_updated_restarting_controller"
            );
            previous.token.cancel();
        }
        self.reap_finished();

        let (settings, replaced) =
            settings.with_channel(DIAGNOSTIC_CHANNEL, Arc::clone(&self.diagnostic));
        if replaced {
            warn!(
                channel = DIAGNOSTIC_CHANNEL,
                "configured_channel_replaced_by_diagnostic_channel"
            );
        }
        let settings = Arc::new(settings);
        let revision = settings.revision().to_string();

        let mut controller = self
            .factory
            .build(Arc::clone(&settings), &self.options.scope, &self.metrics)
            .map_err(|source| SupervisorError::Build {
                revision: revision.clone(),
                source,
            })?;

        let token = self.root.child_token();
        controller
            .init(&token)
            .await
            .map_err(|source| SupervisorError::Init {
                revision: revision.clone(),
                source,
            })?;

        self.generation += 1;
        let generation = self.generation;
        self.controllers
            .spawn(controller.run(token.clone(), self.options.parallelism));
        self.active = Some(ActiveController {
            generation,
            revision: revision.clone(),
            token,
        });

        self.published.send_replace(Arc::clone(&settings));
        self.metrics.record_reload(generation);

        info!(
            generation = generation,
            revision = %revision,
            channels = settings.registry().len(),
            parallelism = self.options.parallelism,
            "controller_running"
        );
        Ok(())
    }

    /// Drop handles of controllers that have already stopped.
    fn reap_finished(&mut self) {
        while let Some(result) = self.controllers.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "controller_task_failed");
            }
        }
        if self.controllers.len() > usize::from(self.active.is_some()) {
            warn!(
                still_running = self.controllers.len(),
                "previous_controllers_still_stopping"
            );
        }
    }

    /// Cancel every controller and wait up to the grace period for them.
    async fn shutdown(&mut self) {
        self.active = None;
        self.root.cancel();

        let grace = self.options.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = self.controllers.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "controller_task_failed");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!("supervisor_stopped"),
            Err(_) => {
                warn!(
                    grace_seconds = grace.as_secs_f64(),
                    still_running = self.controllers.len(),
                    "controllers_did_not_stop_in_time"
                );
                self.controllers.abort_all();
            }
        }
    }
}
