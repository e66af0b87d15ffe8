//! Console channel: writes notifications as lines to a writer.
//!
//! The supervisor injects one of these into every settings snapshot under the
//! name `console`, which makes it useful for debugging a running controller.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{DeliveryError, Destination, Notification, NotificationChannel};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Line-oriented notification sink.
#[derive(Clone)]
pub struct ConsoleChannel {
    writer: SharedWriter,
}

impl ConsoleChannel {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Console channel writing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl fmt::Debug for ConsoleChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleChannel").finish_non_exhaustive()
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn kind(&self) -> &'static str {
        "console"
    }

    async fn deliver(
        &self,
        notification: &Notification,
        destination: &Destination,
    ) -> Result<(), DeliveryError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "console writer poisoned"))?;
        writeln!(writer, "{}: {}", destination.recipient, notification.message)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writer that keeps everything in memory so tests can read it back.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_console_writes_line_per_notification() {
        let buffer = SharedBuffer::default();
        let console = ConsoleChannel::new(buffer.clone());

        console
            .deliver(&Notification::new("first"), &Destination::new("console", "ops"))
            .await
            .unwrap();
        console
            .deliver(&Notification::new("second"), &Destination::new("console", "dev"))
            .await
            .unwrap();

        assert_eq!(buffer.contents(), "ops: first\ndev: second\n");
    }

    #[test]
    fn test_console_has_no_signing_capability() {
        let console = ConsoleChannel::new(SharedBuffer::default());
        assert!(console.signed_requests().is_none());
        assert_eq!(console.kind(), "console");
    }
}
