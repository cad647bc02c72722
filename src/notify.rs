//! Best-effort completion notifications.
//!
//! Emitting never fails the caller: a notifier with no listeners, or one
//! whose channel is full, drops the event.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::enums::FailureClass;

/// Events pushed to connected clients. Carries identifiers and metrics only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    ProcessingStarted {
        patient_id: Uuid,
    },
    PatientProcessed {
        patient_id: Uuid,
        prompt_version: String,
        strategy: String,
        cost_usd: f64,
        duration_ms: i64,
    },
    PatientFailed {
        patient_id: Uuid,
        class: FailureClass,
    },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessingStarted { .. } => "processing_started",
            Self::PatientProcessed { .. } => "patient_processed",
            Self::PatientFailed { .. } => "patient_failed",
        }
    }
}

pub trait Notifier: Send + Sync {
    fn emit(&self, notification: Notification);
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn emit(&self, _notification: Notification) {}
}

/// Fan-out over a tokio broadcast channel.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn emit(&self, notification: Notification) {
        let name = notification.name();
        // No receivers is not an error worth surfacing.
        if self.sender.send(notification).is_err() {
            tracing::trace!(event = name, "Notification dropped, no subscribers");
        }
    }
}

/// Keeps every event in memory; for tests.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(Notification::name).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn emit(&self, notification: Notification) {
        if let Ok(mut events) = self.events.lock() {
            events.push(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_without_subscribers_does_not_fail() {
        let notifier = BroadcastNotifier::new(8);
        notifier.emit(Notification::ProcessingStarted { patient_id: Uuid::new_v4() });
    }

    #[test]
    fn broadcast_reaches_subscriber() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let id = Uuid::new_v4();
        notifier.emit(Notification::PatientFailed {
            patient_id: id,
            class: FailureClass::Transient,
        });
        let received = rx.try_recv().unwrap();
        assert_eq!(received.name(), "patient_failed");
    }

    #[test]
    fn serializes_with_event_tag() {
        let id = Uuid::nil();
        let json = serde_json::to_value(Notification::ProcessingStarted { patient_id: id }).unwrap();
        assert_eq!(json["event"], "processing_started");
        assert_eq!(json["patient_id"], id.to_string());
    }

    #[test]
    fn recording_keeps_order() {
        let notifier = RecordingNotifier::new();
        let id = Uuid::new_v4();
        notifier.emit(Notification::ProcessingStarted { patient_id: id });
        notifier.emit(Notification::PatientFailed {
            patient_id: id,
            class: FailureClass::Configuration,
        });
        assert_eq!(notifier.names(), vec!["processing_started", "patient_failed"]);
    }
}
