//! The notifications controller.
//!
//! Each instance is bound to one settings snapshot. `run` spawns a pool of
//! workers that drain the shared intake queue until the instance's token is
//! cancelled. Every command is acknowledged on the diagnostic console channel
//! and forwarded to the snapshot's subscription destinations.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Controller, ControllerError, ControllerFactory, InboundCommand, IntakeQueue, Scope};
use crate::channels::{Destination, Notification};
use crate::metrics::Metrics;
use crate::settings::Settings;
use crate::supervisor::DIAGNOSTIC_CHANNEL;

/// Builds [`NotificationController`]s that share one intake queue.
#[derive(Clone)]
pub struct NotificationControllerFactory {
    intake: IntakeQueue,
}

impl NotificationControllerFactory {
    pub fn new(intake: IntakeQueue) -> Self {
        Self { intake }
    }
}

impl ControllerFactory for NotificationControllerFactory {
    fn build(
        &self,
        settings: Arc<Settings>,
        scope: &Scope,
        metrics: &Metrics,
    ) -> Result<Box<dyn Controller>, ControllerError> {
        Ok(Box::new(NotificationController {
            settings,
            scope: scope.clone(),
            intake: self.intake.clone(),
            metrics: metrics.clone(),
        }))
    }
}

/// Controller instance bound to a single settings snapshot.
pub struct NotificationController {
    settings: Arc<Settings>,
    scope: Scope,
    intake: IntakeQueue,
    metrics: Metrics,
}

#[async_trait]
impl Controller for NotificationController {
    async fn init(&mut self, token: &CancellationToken) -> Result<(), ControllerError> {
        if token.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }
        if self.scope.namespace.is_empty() {
            return Err(ControllerError::EmptyNamespace);
        }

        let registry = self.settings.registry();
        if let Some(unknown) = self
            .settings
            .destinations()
            .find(|d| !registry.contains(&d.channel))
        {
            return Err(ControllerError::UnknownChannel(unknown.to_string()));
        }

        info!(
            revision = %self.settings.revision(),
            namespace = %self.scope.namespace,
            label_selector = %self.scope.label_selector,
            channels = registry.len(),
            subscriptions = self.settings.subscriptions().len(),
            "controller_initialised"
        );
        Ok(())
    }

    async fn run(self: Box<Self>, token: CancellationToken, parallelism: usize) {
        let revision = self.settings.revision().to_string();
        let controller = Arc::new(*self);
        let mut workers = JoinSet::new();

        for worker in 0..parallelism.max(1) {
            let controller = Arc::clone(&controller);
            let token = token.clone();
            workers.spawn(async move { controller.work(worker, token).await });
        }

        info!(revision = %revision, workers = workers.len(), "controller_started");

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(revision = %revision, error = %e, "controller_worker_failed");
            }
        }

        info!(revision = %revision, "controller_stopped");
    }
}

impl NotificationController {
    async fn work(&self, worker: usize, token: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                command = self.intake.recv() => match command {
                    Some(command) => self.handle(worker, command).await,
                    None => {
                        warn!(worker = worker, "intake_queue_closed");
                        break;
                    }
                },
            }
        }
        debug!(worker = worker, "controller_worker_exiting");
    }

    async fn handle(&self, worker: usize, command: InboundCommand) {
        info!(
            worker = worker,
            channel = %command.channel,
            body_length = command.body.len(),
            "command_received"
        );
        self.metrics.record_command(&command.channel);

        let notification = Notification::new(format!(
            "{} callback received ({} bytes, settings {})",
            command.channel,
            command.body.len(),
            self.settings.revision()
        ));

        match self.settings.registry().get(DIAGNOSTIC_CHANNEL) {
            Some(console) => {
                let ack = Destination::new(DIAGNOSTIC_CHANNEL, command.channel.as_str());
                if let Err(e) = console.deliver(&notification, &ack).await {
                    warn!(channel = %command.channel, error = %e, "command_ack_failed");
                }
            }
            None => debug!(channel = %command.channel, "diagnostic_channel_absent"),
        }

        self.notify_subscribers(&notification).await;
    }

    /// Deliver to every distinct subscription destination.
    async fn notify_subscribers(&self, notification: &Notification) {
        let destinations: BTreeSet<&Destination> = self.settings.destinations().collect();

        for destination in destinations {
            let Some(channel) = self.settings.registry().get(&destination.channel) else {
                warn!(destination = %destination, "subscription_channel_missing");
                self.metrics.record_delivery(&destination.channel, "failed");
                continue;
            };

            match channel.deliver(notification, destination).await {
                Ok(()) => {
                    debug!(destination = %destination, "notification_delivered");
                    self.metrics.record_delivery(&destination.channel, "sent");
                }
                Err(e) => {
                    warn!(destination = %destination, error = %e, "notification_delivery_failed");
                    self.metrics.record_delivery(&destination.channel, "failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::channels::console::tests::SharedBuffer;
    use crate::channels::{ConsoleChannel, WebhookChannel};
    use crate::settings::{ChannelRegistry, Subscription};

    fn scope() -> Scope {
        Scope {
            namespace: "argocd".to_string(),
            label_selector: String::new(),
        }
    }

    fn settings_with_console(
        buffer: SharedBuffer,
        subscriptions: Vec<Subscription>,
    ) -> Arc<Settings> {
        let mut registry = ChannelRegistry::new();
        registry.insert(DIAGNOSTIC_CHANNEL, Arc::new(ConsoleChannel::new(buffer)));
        Arc::new(Settings::new("rev-a", registry, subscriptions))
    }

    #[tokio::test]
    async fn test_init_rejects_unknown_subscription_channel() {
        let settings = settings_with_console(
            SharedBuffer::default(),
            vec![Subscription {
                destinations: vec![Destination::new("slack", "deployments")],
            }],
        );
        let factory = NotificationControllerFactory::new(IntakeQueue::new(4));
        let mut controller = factory.build(settings, &scope(), &Metrics::new()).unwrap();

        let err = controller.init(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ControllerError::UnknownChannel(ref d) if d == "slack:deployments"));
    }

    #[tokio::test]
    async fn test_init_rejects_empty_namespace() {
        let settings = settings_with_console(SharedBuffer::default(), Vec::new());
        let factory = NotificationControllerFactory::new(IntakeQueue::new(4));
        let empty = Scope {
            namespace: String::new(),
            label_selector: String::new(),
        };
        let mut controller = factory.build(settings, &empty, &Metrics::new()).unwrap();

        let err = controller.init(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ControllerError::EmptyNamespace));
    }

    #[tokio::test]
    async fn test_run_drains_intake_until_cancelled() {
        let buffer = SharedBuffer::default();
        let settings = settings_with_console(buffer.clone(), Vec::new());
        let intake = IntakeQueue::new(8);
        let metrics = Metrics::new();
        let factory = NotificationControllerFactory::new(intake.clone());

        let token = CancellationToken::new();
        let mut controller = factory.build(settings, &scope(), &metrics).unwrap();
        controller.init(&token).await.unwrap();
        let handle = tokio::spawn(controller.run(token.clone(), 2));

        intake.submit(InboundCommand::new("slack", b"payload".to_vec())).unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !buffer.contents().contains("slack callback received") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(buffer.contents().contains("settings rev-a"));
        assert!(metrics
            .encode()
            .unwrap()
            .contains("notifications_commands_processed_total{channel=\"slack\"} 1"));
    }

    /// Local HTTP endpoint recording every JSON body posted to `/hook`.
    async fn capture_server() -> (String, Arc<tokio::sync::Mutex<Vec<serde_json::Value>>>) {
        use axum::{extract::State, routing::post, Json, Router};

        type Received = Arc<tokio::sync::Mutex<Vec<serde_json::Value>>>;

        async fn record(State(received): State<Received>, Json(body): Json<serde_json::Value>) {
            received.lock().await.push(body);
        }

        let received = Received::default();
        let app = Router::new()
            .route("/hook", post(record))
            .with_state(Arc::clone(&received));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (url, received)
    }

    #[tokio::test]
    async fn test_commands_are_forwarded_to_subscriptions() {
        let (url, received) = capture_server().await;
        let console = SharedBuffer::default();
        let audit = SharedBuffer::default();

        let mut registry = ChannelRegistry::new();
        registry.insert(DIAGNOSTIC_CHANNEL, Arc::new(ConsoleChannel::new(console.clone())));
        registry.insert("audit", Arc::new(ConsoleChannel::new(audit.clone())));
        registry.insert(
            "hook",
            Arc::new(WebhookChannel::new(url, Default::default(), reqwest::Client::new())),
        );
        let subscriptions = vec![
            Subscription {
                destinations: vec![
                    Destination::new("hook", "ops"),
                    Destination::new("audit", "log"),
                ],
            },
            // Repeated destinations are delivered once.
            Subscription {
                destinations: vec![Destination::new("hook", "ops")],
            },
        ];
        let settings = Arc::new(Settings::new("rev-b", registry, subscriptions));

        let intake = IntakeQueue::new(4);
        let metrics = Metrics::new();
        let factory = NotificationControllerFactory::new(intake.clone());
        let token = CancellationToken::new();
        let mut controller = factory.build(settings, &scope(), &metrics).unwrap();
        controller.init(&token).await.unwrap();
        let handle = tokio::spawn(controller.run(token.clone(), 1));

        intake.submit(InboundCommand::new("slack", b"{}".to_vec())).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while received.lock().await.is_empty() || audit.contents().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        handle.await.unwrap();

        let posted = received.lock().await.clone();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0]["recipient"], "ops");
        assert_eq!(posted[0]["message"], "slack callback received (2 bytes, settings rev-b)");
        assert_eq!(audit.contents(), "log: slack callback received (2 bytes, settings rev-b)\n");
        assert!(console.contents().starts_with("slack: slack callback received"));

        let text = metrics.encode().unwrap();
        for channel in ["hook", "audit"] {
            let series = format!(
                "notifications_deliveries_total{{channel=\"{}\",outcome=\"sent\"}} 1",
                channel
            );
            assert!(text.contains(&series), "{}", text);
        }
    }

    #[tokio::test]
    async fn test_failed_delivery_is_counted() {
        let mut registry = ChannelRegistry::new();
        registry.insert(
            "hook",
            Arc::new(WebhookChannel::new(
                "http://127.0.0.1:9/hook",
                Default::default(),
                reqwest::Client::new(),
            )),
        );
        let subscriptions = vec![Subscription {
            destinations: vec![Destination::new("hook", "ops")],
        }];
        let settings = Arc::new(Settings::new("rev-c", registry, subscriptions));
        let metrics = Metrics::new();
        let controller = NotificationController {
            settings,
            scope: scope(),
            intake: IntakeQueue::new(1),
            metrics: metrics.clone(),
        };

        controller.handle(0, InboundCommand::new("slack", Vec::new())).await;

        let text = metrics.encode().unwrap();
        let series = "notifications_deliveries_total{channel=\"hook\",outcome=\"failed\"} 1";
        assert!(text.contains(series), "{}", text);
    }
}
