//! Bounded history of published events.

use std::collections::VecDeque;

use tokio::sync::RwLock;

use crate::event::WebhookEvent;

/// Default number of events retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Insertion-ordered ring of recent events; the oldest entry is evicted first.
pub struct EventHistory {
    events: RwLock<VecDeque<WebhookEvent>>,
    capacity: usize,
}

impl EventHistory {
    /// Creates a history holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends an event, evicting the oldest when full.
    pub async fn push(&self, event: WebhookEvent) {
        let mut events = self.events.write().await;
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// The most recent `limit` events, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<WebhookEvent> {
        let events = self.events.read().await;
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// Finds a retained event by id.
    pub async fn get(&self, id: &str) -> Option<WebhookEvent> {
        self.events.read().await.iter().find(|e| e.id == id).cloned()
    }

    /// Number of retained events.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Whether no event has been retained yet.
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Most events retained before the oldest is evicted.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, NewEvent};

    fn event(n: usize) -> WebhookEvent {
        WebhookEvent::stamp(NewEvent::new(
            "test",
            EventPayload::custom("test.event", serde_json::json!({ "n": n })),
        ))
    }

    #[tokio::test]
    async fn test_evicts_oldest() {
        let history = EventHistory::default();
        let mut ids = Vec::new();
        for n in 0..1005 {
            let event = event(n);
            ids.push(event.id.clone());
            history.push(event).await;
        }

        assert_eq!(history.len().await, 1000);
        for id in &ids[..5] {
            assert!(history.get(id).await.is_none());
        }
        assert!(history.get(&ids[5]).await.is_some());

        let all = history.recent(usize::MAX).await;
        assert_eq!(all.first().unwrap().id, ids[5]);
        assert_eq!(all.last().unwrap().id, ids[1004]);
    }

    #[tokio::test]
    async fn test_recent_limit() {
        let history = EventHistory::new(10);
        for n in 0..4 {
            history.push(event(n)).await;
        }

        let recent = history.recent(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].data, EventPayload::custom("test.event", serde_json::json!({ "n": 3 })));
        assert_eq!(history.recent(0).await.len(), 0);
        assert_eq!(history.recent(100).await.len(), 4);
    }
}
