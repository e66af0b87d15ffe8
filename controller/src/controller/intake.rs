//! Intake queue between the webhook server and the running controller.
//!
//! The web server enqueues verified callbacks without parsing them and
//! responds immediately; controller workers drain the queue. The queue lives
//! for the whole process so it survives controller reloads.

use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// A verified inbound callback awaiting controller handling.
#[derive(Debug, Clone)]
pub struct InboundCommand {
    /// Channel whose signing secret authenticated the request
    pub channel: String,
    /// Raw request body, exactly as signed
    pub body: Vec<u8>,
    pub received_at: SystemTime,
}

impl InboundCommand {
    pub fn new(channel: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            body,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("intake queue is full")]
    Full,
    #[error("intake queue is closed")]
    Closed,
}

/// Bounded multi-producer, multi-consumer command queue.
#[derive(Clone)]
pub struct IntakeQueue {
    tx: mpsc::Sender<InboundCommand>,
    rx: Arc<Mutex<mpsc::Receiver<InboundCommand>>>,
}

impl IntakeQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue without waiting.
    pub fn submit(&self, command: InboundCommand) -> Result<(), IntakeError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IntakeError::Full,
            mpsc::error::TrySendError::Closed(_) => IntakeError::Closed,
        })
    }

    /// Wait for the next command. Cancel-safe.
    pub async fn recv(&self) -> Option<InboundCommand> {
        self.rx.lock().await.recv().await
    }

    /// Commands currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_and_recv_in_order() {
        let queue = IntakeQueue::new(4);
        queue.submit(InboundCommand::new("slack", b"one".to_vec())).unwrap();
        queue.submit(InboundCommand::new("slack", b"two".to_vec())).unwrap();
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.recv().await.unwrap().body, b"one");
        assert_eq!(queue.recv().await.unwrap().body, b"two");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_rejects() {
        let queue = IntakeQueue::new(1);
        queue.submit(InboundCommand::new("slack", Vec::new())).unwrap();
        assert_eq!(
            queue.submit(InboundCommand::new("slack", Vec::new())),
            Err(IntakeError::Full)
        );
    }

    #[tokio::test]
    async fn test_clones_share_queue() {
        let queue = IntakeQueue::new(2);
        let producer = queue.clone();
        producer.submit(InboundCommand::new("a", Vec::new())).unwrap();
        assert_eq!(queue.recv().await.unwrap().channel, "a");
    }
}
