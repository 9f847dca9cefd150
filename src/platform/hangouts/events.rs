use std::collections::BTreeMap;

use serde::Deserialize;

use super::card::{ActionParameter, ChatMessage, Space};

/// An event delivered by Hangouts Chat through the Pub/Sub subscription.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    /// RFC 3339 timestamp of the event
    #[serde(default)]
    pub event_time: String,
    #[serde(default)]
    pub space: Option<Space>,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub user: Option<ChatUser>,
    #[serde(default)]
    pub action: Option<EventAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    AddedToSpace,
    Message,
    CardClicked,
    RemovedFromSpace,
    Other(String),
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "ADDED_TO_SPACE" => EventType::AddedToSpace,
            "MESSAGE" => EventType::Message,
            "CARD_CLICKED" => EventType::CardClicked,
            "REMOVED_FROM_SPACE" => EventType::RemovedFromSpace,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl ChatEvent {
    pub fn kind(&self) -> EventType {
        EventType::from(self.event_type.as_str())
    }

    pub fn space_name(&self) -> &str {
        self.space.as_ref().map(|s| s.name.as_str()).unwrap_or("")
    }

    pub fn display_name(&self) -> &str {
        self.user
            .as_ref()
            .map(|u| u.display_name.as_str())
            .unwrap_or("")
    }

    pub fn thread_name(&self) -> &str {
        self.message
            .as_ref()
            .and_then(|m| m.thread.as_ref())
            .map(|t| t.name.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

/// The action attached to a clicked card button.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAction {
    #[serde(default)]
    pub action_method_name: String,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
}

impl EventAction {
    /// The echoed callback infos as a map.
    pub fn callback_infos(&self) -> BTreeMap<String, String> {
        self.parameters
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect()
    }
}
