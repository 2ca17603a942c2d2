use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use ulid::Ulid;

use crate::observability::NOTIFICATIONS_FAILED_TOTAL;

const QUEUE_CAPACITY: usize = 1024;

/// A notification the engine wants sent once its transaction has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationIntent {
    pub recipients: Vec<Ulid>,
    pub title: String,
    pub body: String,
    pub link: String,
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery backend (push, email, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, intent: &NotificationIntent) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used when no delivery backend is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, intent: &NotificationIntent) -> Result<(), NotifyError> {
        info!(
            recipients = intent.recipients.len(),
            title = %intent.title,
            link = %intent.link,
            "notification"
        );
        Ok(())
    }
}

/// Queue in front of a `Notifier`. Dispatching never blocks and never fails
/// the caller; a full queue or a delivery error is logged and counted.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<NotificationIntent>,
}

impl NotificationDispatcher {
    pub fn start(notifier: Arc<dyn Notifier>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(dispatch_loop(rx, notifier));
        (Self { tx }, handle)
    }

    pub fn dispatch(&self, intents: Vec<NotificationIntent>) {
        for intent in intents {
            if intent.recipients.is_empty() {
                continue;
            }
            if let Err(e) = self.tx.try_send(intent) {
                metrics::counter!(NOTIFICATIONS_FAILED_TOTAL).increment(1);
                warn!("notification dropped: {e}");
            }
        }
    }
}

async fn dispatch_loop(mut rx: mpsc::Receiver<NotificationIntent>, notifier: Arc<dyn Notifier>) {
    while let Some(intent) = rx.recv().await {
        if let Err(e) = notifier.notify(&intent).await {
            metrics::counter!(NOTIFICATIONS_FAILED_TOTAL).increment(1);
            warn!(title = %intent.title, "{e}");
        }
    }
}
