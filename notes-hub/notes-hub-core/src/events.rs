use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Event {
    Created { id: Uuid, user_id: String },
    Updated { id: Uuid },
    Removed { id: Uuid },
    Archived { id: Uuid },
    Restored { id: Uuid, detached: bool },
    PropagationFinished { job: Uuid, root: Uuid, patched: usize },
    PropagationFailed { job: Uuid, root: Uuid, error: String },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.send(Event::Archived { id });
        assert_eq!(rx.recv().await.unwrap(), Event::Archived { id });
    }

    #[test]
    fn send_without_subscribers_is_silent() {
        EventBus::new().send(Event::Removed { id: Uuid::new_v4() });
    }

    #[test]
    fn events_are_tagged() {
        let json = serde_json::to_value(Event::Restored {
            id: Uuid::nil(),
            detached: true,
        })
        .unwrap();
        assert_eq!(json["type"], "Restored");
        assert_eq!(json["detached"], true);
    }
}
