//! Notification side-channel
//!
//! Lifecycle notices are mirrored to `tracing` and broadcast to any
//! subscribers (a toast UI, a status line). Sending never blocks and never
//! fails when nobody is listening.

use crate::types::{Notification, Severity};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn info(&self, title: &str, message: &str) {
        self.send(Notification::info(title, message));
    }

    pub fn error(&self, title: &str, message: &str) {
        self.send(Notification::error(title, message));
    }

    fn send(&self, notification: Notification) {
        match notification.severity {
            Severity::Info => {
                tracing::info!(title = %notification.title, "{}", notification.message)
            }
            Severity::Error => {
                tracing::error!(title = %notification.title, "{}", notification.message)
            }
        }
        // No receivers is not an error
        let _ = self.tx.send(notification);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}
