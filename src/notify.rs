use crate::status::SubmissionStatus;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Broadcast after a submission outcome is committed. Interested parties
/// (mail delivery, dashboards) subscribe; a send with no subscribers is
/// not an error.
#[derive(Debug, Clone)]
pub struct SubmittedNotification {
    pub token: Uuid,
    pub report_code: String,
    pub bank_code: Option<String>,
    pub period: String,
    pub status: SubmissionStatus,
    pub submitted_report_id: Option<i64>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<SubmittedNotification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubmittedNotification> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notification: SubmittedNotification) {
        let _ = self.sender.send(notification);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}
