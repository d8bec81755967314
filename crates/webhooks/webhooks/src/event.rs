//! Event types and payloads.

use chrono::{DateTime, Utc};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WebhookError, WebhookResult};

/// Known event types that endpoints can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A subtitle file was downloaded.
    SubtitleDownloaded,
    /// An existing subtitle was replaced by a better one.
    SubtitleUpgraded,
    /// A subtitle download failed.
    SubtitleFailed,
    /// A subtitle search finished.
    SubtitleSearched,
    /// Manual test delivery.
    WebhookTest,
}

impl EventKind {
    /// All known kinds, in catalogue order.
    pub const ALL: [EventKind; 5] = [
        EventKind::SubtitleDownloaded,
        EventKind::SubtitleUpgraded,
        EventKind::SubtitleFailed,
        EventKind::SubtitleSearched,
        EventKind::WebhookTest,
    ];

    /// Dotted type string used on the wire and in subscriptions.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SubtitleDownloaded => "subtitle.downloaded",
            EventKind::SubtitleUpgraded => "subtitle.upgraded",
            EventKind::SubtitleFailed => "subtitle.failed",
            EventKind::SubtitleSearched => "subtitle.searched",
            EventKind::WebhookTest => "webhook.test",
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            EventKind::SubtitleDownloaded => "A subtitle was downloaded for a media file",
            EventKind::SubtitleUpgraded => "An existing subtitle was replaced with a higher scoring one",
            EventKind::SubtitleFailed => "A subtitle download failed",
            EventKind::SubtitleSearched => "A subtitle search completed",
            EventKind::WebhookTest => "Test event sent manually to a single endpoint",
        }
    }

    /// Looks up a kind by its type string.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalogue entry for an event type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventTypeInfo {
    /// Type string.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Human-readable description.
    pub description: String,
}

/// Lists every known event type with its description.
pub fn event_types() -> Vec<EventTypeInfo> {
    EventKind::ALL
        .iter()
        .map(|kind| EventTypeInfo {
            event_type: kind.as_str().to_string(),
            description: kind.description().to_string(),
        })
        .collect()
}

/// Payload of `subtitle.downloaded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleDownloaded {
    pub media_path: String,
    pub subtitle_path: String,
    pub language: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

/// Payload of `subtitle.upgraded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleUpgraded {
    pub media_path: String,
    pub subtitle_path: String,
    pub language: String,
    pub provider: String,
    pub previous_score: u32,
    pub new_score: u32,
}

/// Payload of `subtitle.failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleFailed {
    pub media_path: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub reason: String,
}

/// Payload of `subtitle.searched`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleSearched {
    pub media_path: String,
    pub language: String,
    pub results: u32,
}

/// Payload of `webhook.test`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookTest {
    pub message: String,
}

/// Event body, one variant per known event type.
///
/// The event type string is derived from the variant. [`EventPayload::Custom`]
/// carries any other dotted type with an opaque JSON document; validation
/// rejects a custom payload that names a catalogue type.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    SubtitleDownloaded(SubtitleDownloaded),
    SubtitleUpgraded(SubtitleUpgraded),
    SubtitleFailed(SubtitleFailed),
    SubtitleSearched(SubtitleSearched),
    WebhookTest(WebhookTest),
    Custom { event_type: String, data: Value },
}

impl EventPayload {
    /// Creates a custom payload with an arbitrary type.
    pub fn custom(event_type: impl Into<String>, data: Value) -> Self {
        EventPayload::Custom {
            event_type: event_type.into(),
            data,
        }
    }

    /// Type string of this payload.
    pub fn event_type(&self) -> &str {
        match self {
            EventPayload::SubtitleDownloaded(_) => EventKind::SubtitleDownloaded.as_str(),
            EventPayload::SubtitleUpgraded(_) => EventKind::SubtitleUpgraded.as_str(),
            EventPayload::SubtitleFailed(_) => EventKind::SubtitleFailed.as_str(),
            EventPayload::SubtitleSearched(_) => EventKind::SubtitleSearched.as_str(),
            EventPayload::WebhookTest(_) => EventKind::WebhookTest.as_str(),
            EventPayload::Custom { event_type, .. } => event_type,
        }
    }
}

impl Serialize for EventPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EventPayload::SubtitleDownloaded(p) => p.serialize(serializer),
            EventPayload::SubtitleUpgraded(p) => p.serialize(serializer),
            EventPayload::SubtitleFailed(p) => p.serialize(serializer),
            EventPayload::SubtitleSearched(p) => p.serialize(serializer),
            EventPayload::WebhookTest(p) => p.serialize(serializer),
            EventPayload::Custom { data, .. } => data.serialize(serializer),
        }
    }
}

/// An event as handed to the dispatcher, before it is assigned an id.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Component raising the event.
    pub source: String,
    /// Event body.
    pub payload: EventPayload,
}

impl NewEvent {
    /// Creates a new event.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            source: source.into(),
            payload,
        }
    }

    /// Checks that the event can be published.
    pub fn validate(&self) -> WebhookResult<()> {
        if self.source.trim().is_empty() {
            return Err(WebhookError::InvalidEvent("source must not be empty".to_string()));
        }
        let event_type = self.payload.event_type();
        if !is_valid_event_type(event_type) {
            return Err(WebhookError::InvalidEvent(format!(
                "event type '{event_type}' must be dotted lowercase, e.g. 'subtitle.downloaded'"
            )));
        }
        if matches!(self.payload, EventPayload::Custom { .. }) && EventKind::parse(event_type).is_some() {
            return Err(WebhookError::InvalidEvent(format!(
                "event type '{event_type}' requires its typed payload"
            )));
        }
        Ok(())
    }
}

/// A published event. Immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Dispatcher-assigned identifier.
    pub id: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Dispatcher-assigned publish time.
    pub timestamp: DateTime<Utc>,
    /// Component that raised the event.
    pub source: String,
    /// Event body.
    pub data: EventPayload,
}

impl WebhookEvent {
    /// Stamps an accepted event with a fresh id and the current time.
    pub(crate) fn stamp(event: NewEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event.payload.event_type().to_string(),
            timestamp: Utc::now(),
            source: event.source,
            data: event.payload,
        }
    }

    /// Serializes the event into the delivery body.
    pub fn to_payload(&self) -> WebhookResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// `segment(.segment)+`, each segment `[a-z0-9_]+`.
fn is_valid_event_type(s: &str) -> bool {
    let mut segments = 0;
    for segment in s.split('.') {
        if segment.is_empty()
            || !segment
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return false;
        }
        segments += 1;
    }
    segments >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloaded() -> EventPayload {
        EventPayload::SubtitleDownloaded(SubtitleDownloaded {
            media_path: "/media/tv/show/s01e01.mkv".to_string(),
            subtitle_path: "/media/tv/show/s01e01.en.srt".to_string(),
            language: "en".to_string(),
            provider: "opensubtitles".to_string(),
            score: Some(92),
        })
    }

    #[test]
    fn test_type_derived_from_payload() {
        assert_eq!(downloaded().event_type(), "subtitle.downloaded");
        let custom = EventPayload::custom("library.scanned", serde_json::json!({"count": 3}));
        assert_eq!(custom.event_type(), "library.scanned");
    }

    #[test]
    fn test_wire_format() {
        let event = WebhookEvent::stamp(NewEvent::new("downloader", downloaded()));
        let value: Value = serde_json::from_slice(&event.to_payload().unwrap()).unwrap();

        assert_eq!(value["id"], event.id.as_str());
        assert_eq!(value["type"], "subtitle.downloaded");
        assert_eq!(value["source"], "downloader");
        assert_eq!(value["data"]["language"], "en");
        assert_eq!(value["data"]["score"], 92);
        // ISO-8601 timestamp
        let ts = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_custom_payload_serializes_data_only() {
        let event = WebhookEvent::stamp(NewEvent::new(
            "scanner",
            EventPayload::custom("library.scanned", serde_json::json!({"count": 3})),
        ));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "library.scanned");
        assert_eq!(value["data"], serde_json::json!({"count": 3}));
    }

    #[test]
    fn test_validate() {
        assert!(NewEvent::new("downloader", downloaded()).validate().is_ok());
        assert!(NewEvent::new("", downloaded()).validate().is_err());

        for bad in ["", "subtitle", "Subtitle.Downloaded", "subtitle..downloaded", "a.b ", ".a"] {
            let event = NewEvent::new("x", EventPayload::custom(bad, Value::Null));
            assert!(
                matches!(event.validate(), Err(WebhookError::InvalidEvent(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_custom_cannot_claim_catalogue_type() {
        for kind in EventKind::ALL {
            let event = NewEvent::new("x", EventPayload::custom(kind.as_str(), serde_json::json!({"any": 1})));
            assert!(
                matches!(event.validate(), Err(WebhookError::InvalidEvent(_))),
                "{}",
                kind.as_str()
            );
        }
        let event = NewEvent::new("x", EventPayload::custom("subtitle.renamed", Value::Null));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_catalogue() {
        let types = event_types();
        assert_eq!(types.len(), EventKind::ALL.len());
        assert!(types.iter().any(|t| t.event_type == "subtitle.downloaded"));
        assert_eq!(EventKind::parse("subtitle.failed"), Some(EventKind::SubtitleFailed));
        assert_eq!(EventKind::parse("nope"), None);
    }
}
