use crate::{
    core::{AuditEvent, EventSink},
    k8s::Client,
};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};

/// Publishes audit events as Kubernetes events on the policy.
pub(crate) struct RecorderSink {
    recorder: Recorder,
}

impl RecorderSink {
    pub(crate) fn new(client: Client, controller: &str, instance: String) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: Some(instance),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl EventSink for RecorderSink {
    async fn publish(&self, events: Vec<AuditEvent>) {
        for event in events {
            let AuditEvent {
                regarding,
                related,
                reason,
                action,
                note,
            } = event;
            let event = Event {
                type_: EventType::Normal,
                reason: reason.to_string(),
                note: Some(note),
                action: action.to_string(),
                secondary: related,
            };
            if let Err(error) = self.recorder.publish(&event, &regarding).await {
                tracing::warn!(%reason, %error, "Failed to publish event");
            }
        }
    }
}
