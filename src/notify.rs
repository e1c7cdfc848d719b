//! Notifications sent to the owner of a request
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KycEvent {
    SubmissionReceived { request_id: String },
    Approved { request_id: String },
    Rejected { request_id: String, reason: String },
    InfoRequested { request_id: String, feedback: Vec<String> },
}

impl KycEvent {
    pub fn name(&self) -> &'static str {
        match self {
            KycEvent::SubmissionReceived { .. } => "submission_received",
            KycEvent::Approved { .. } => "approved",
            KycEvent::Rejected { .. } => "rejected",
            KycEvent::InfoRequested { .. } => "info_requested",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            KycEvent::SubmissionReceived { request_id }
            | KycEvent::Approved { request_id }
            | KycEvent::Rejected { request_id, .. }
            | KycEvent::InfoRequested { request_id, .. } => request_id,
        }
    }
}

/// Delivery channel towards users (email, push, in-app inbox).
pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: &str, event: &KycEvent) -> anyhow::Result<()>;
}

/// Writes events to the log. Useful where no delivery channel is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, user_id: &str, event: &KycEvent) -> anyhow::Result<()> {
        info!(user_id, event = event.name(), request_id = event.request_id(), "kyc notification");
        Ok(())
    }
}

// Fire and forget: a failed delivery never undoes the state change that
// triggered it.
pub(crate) fn dispatch(notifier: &dyn Notifier, user_id: &str, event: KycEvent) {
    if let Err(e) = notifier.notify(user_id, &event) {
        warn!(
            user_id,
            event = event.name(),
            request_id = event.request_id(),
            error = %e,
            "notification delivery failed"
        );
    }
}
