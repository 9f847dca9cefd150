use serde::{Deserialize, Serialize};

use crate::platform::{GenericButton, GenericMessage};

/// A Hangouts Chat message, used both for sending and as part of inbound events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Resource name, e.g. `spaces/AAA/messages/BBB`. Set by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Text with the bot mention stripped. Only present on inbound messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cards: Vec<Card>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<Thread>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<Space>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_response: Option<ActionResponse>,
}

impl ChatMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Attach the message to a thread, ignoring empty thread names.
    pub fn in_thread(mut self, thread: &str) -> Self {
        if !thread.is_empty() {
            self.thread = Some(Thread {
                name: thread.to_string(),
            });
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub space_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(rename = "type")]
    pub response_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<CardHeader>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardHeader {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtitle: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_value: Option<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValue {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub top_label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bottom_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<Button>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Button {
    TextButton(TextButton),
    ImageButton(ImageButton),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextButton {
    pub text: String,
    pub on_click: OnClick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageButton {
    pub image_url: String,
    pub on_click: OnClick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnClick {
    OpenLink(OpenLink),
    Action(FormAction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLink {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormAction {
    pub action_method_name: String,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParameter {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Convert a generic message into the Hangouts Chat wire format.
///
/// Without buttons the message is plain text. With buttons it becomes a single
/// card with one key/value section per button and `content_text` is dropped.
/// Thread and space addressing is left to the caller.
pub fn to_chat_message(msg: &GenericMessage) -> ChatMessage {
    if !msg.is_card() {
        return ChatMessage::text(msg.content_text.clone());
    }

    let sections = msg
        .buttons
        .iter()
        .map(|button| Section {
            widgets: vec![Widget {
                key_value: Some(KeyValue {
                    top_label: button.header_text.clone(),
                    content: button.content_text.clone(),
                    bottom_label: button.footer_text.clone(),
                    button: Some(to_chat_button(button)),
                }),
            }],
        })
        .collect();

    ChatMessage {
        cards: vec![Card {
            header: Some(CardHeader {
                title: msg.header_text.clone(),
                subtitle: msg.footer_text.clone(),
                image_url: msg.header_picture_url.clone(),
            }),
            sections,
        }],
        ..Default::default()
    }
}

fn to_chat_button(button: &GenericButton) -> Button {
    let on_click = if button.is_link() {
        OnClick::OpenLink(OpenLink {
            url: button.on_click_link.clone(),
        })
    } else {
        OnClick::Action(FormAction {
            action_method_name: button.callback_function.clone(),
            parameters: button
                .callback_infos
                .iter()
                .map(|(key, value)| ActionParameter {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        })
    };

    if button.button_text.is_empty() && !button.picture_url.is_empty() {
        Button::ImageButton(ImageButton {
            image_url: button.picture_url.clone(),
            on_click,
        })
    } else {
        Button::TextButton(TextButton {
            text: button.button_text.clone(),
            on_click,
        })
    }
}
