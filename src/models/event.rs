use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a tracked occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// `session_start` / `session_end` markers.
    Lifecycle,
    PageView,
    UserInteraction,
    Heartbeat,
    VisibilityChange,
    /// Periodic `activity_update` snapshots.
    Activity,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Lifecycle => "lifecycle",
            EventType::PageView => "page_view",
            EventType::UserInteraction => "user_interaction",
            EventType::Heartbeat => "heartbeat",
            EventType::VisibilityChange => "visibility_change",
            EventType::Activity => "activity",
        }
    }

    /// Explicit user actions. Only these move the inactivity deadline;
    /// periodic events must not keep a session alive on their own.
    pub fn is_interaction(&self) -> bool {
        matches!(self, EventType::UserInteraction | EventType::PageView)
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "lifecycle" => Ok(EventType::Lifecycle),
            "page_view" => Ok(EventType::PageView),
            "user_interaction" => Ok(EventType::UserInteraction),
            "heartbeat" => Ok(EventType::Heartbeat),
            "visibility_change" => Ok(EventType::VisibilityChange),
            "activity" => Ok(EventType::Activity),
            other => Err(format!("unknown event type {other}")),
        }
    }
}

/// One discrete occurrence inside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub name: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    /// Page URL when the event was created, not when the session started.
    pub page_url: String,
}

impl EventRecord {
    pub fn new(event_type: EventType, name: impl Into<String>, metadata: Value, page_url: String) -> Self {
        Self {
            event_type,
            name: name.into(),
            metadata,
            created_at: Utc::now(),
            page_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_user_actions_count_as_interaction() {
        assert!(EventType::UserInteraction.is_interaction());
        assert!(EventType::PageView.is_interaction());
        assert!(!EventType::Heartbeat.is_interaction());
        assert!(!EventType::Activity.is_interaction());
        assert!(!EventType::VisibilityChange.is_interaction());
        assert!(!EventType::Lifecycle.is_interaction());
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let record = EventRecord::new(
            EventType::UserInteraction,
            "button_click",
            json!({"id": "cta"}),
            "https://shop.example/".into(),
        );
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["type"], "user_interaction");
        assert_eq!(value["name"], "button_click");
        assert_eq!(value["pageUrl"], "https://shop.example/");
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn parses_type_names() {
        assert_eq!("heartbeat".parse::<EventType>(), Ok(EventType::Heartbeat));
        assert!("bogus".parse::<EventType>().is_err());
        for event_type in [EventType::PageView, EventType::Activity, EventType::Lifecycle] {
            assert_eq!(event_type.as_str().parse::<EventType>(), Ok(event_type));
        }
    }
}
