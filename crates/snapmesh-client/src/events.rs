//! Typed notifications published by the content core.
//!
//! The [`EventBus`] is owned by the coordinator and handed by reference to
//! every component that publishes. Consumers call [`EventBus::subscribe`].

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentEvent {
    /// A record entered the item list.
    Added { info_hash: String },
    /// The record is bound to engine file content; rendering may start.
    Ready { info_hash: String },
    /// The render pipeline finished with the item.
    Rendered { info_hash: String },
    Progress {
        info_hash: String,
        progress: f64,
        download_speed: u64,
        upload_speed: u64,
    },
    /// All content for the item is local.
    Completed { info_hash: String },
    /// An upload or add turned out to be content the engine already holds
    /// under `existing`. For uploads `placeholder` is the record that was
    /// dropped; for adds it is the identifier that was asked for.
    Duplicate { placeholder: String, existing: String },
    UploadFailed { info_hash: String, reason: String },
    /// Transfer or render failure of a non-local item.
    Failed { info_hash: String, reason: String },
    Deleted { info_hash: String },
    /// Local ownership was re-registered for these items.
    OwnershipHealed { info_hashes: Vec<String> },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ContentEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContentEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ContentEvent) {
        trace!(?event, "content event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ContentEvent::Duplicate {
            placeholder: "loading-1".into(),
            existing: "abc".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "duplicate", "placeholder": "loading-1", "existing": "abc" })
        );
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(ContentEvent::Added { info_hash: "h1".into() });
        assert_eq!(rx.recv().await.unwrap(), ContentEvent::Added { info_hash: "h1".into() });
    }
}
