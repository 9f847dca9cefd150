pub mod hangouts;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identity of a chat participant, shared by every platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Userinfo {
    /// Path used inside the messaging protocol to reach this user.
    /// Also the key the subscriber directory stores the user under.
    pub message_path: String,
    /// Username for internal usage
    pub username: String,
    /// Name used to speak to the user
    pub friendly_name: String,
}

/// A chat participant on some platform. Every messaging platform implements this.
#[async_trait]
pub trait User: Send + Sync + fmt::Debug {
    fn user_info(&self) -> &Userinfo;

    async fn send_message(&self, msg: &GenericMessage) -> Result<()>;

    async fn add_to_alert_group(&self, group: &str) -> Result<()>;

    async fn del_from_alert_group(&self, group: &str) -> Result<()>;
}

/// Resolves the users that should be told about alerts for a group.
#[async_trait]
pub trait AlertSubscribers: Send + Sync {
    async fn users_for_alert_group(&self, group: &str) -> Vec<Arc<dyn User>>;
}

/// A platform-neutral outbound (or routed inbound) message.
///
/// `content_text` alone renders as plain text. As soon as `buttons` is
/// non-empty the message renders as a card and `content_text` is ignored.
#[derive(Debug, Clone, Default)]
pub struct GenericMessage {
    pub header_text: String,
    pub content_text: String,
    pub footer_text: String,
    /// Must be publicly reachable, the platform fetches it itself.
    pub header_picture_url: String,
    /// Path to the group chat / DM this message belongs to
    pub message_path: String,
    /// Thread in the chat
    pub thread: String,
    pub sender: Option<Arc<dyn User>>,
    pub buttons: Vec<GenericButton>,
}

impl GenericMessage {
    /// Plain text message.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content_text: content.into(),
            ..Default::default()
        }
    }

    pub fn is_card(&self) -> bool {
        !self.buttons.is_empty()
    }
}

/// A button inside a card, together with the text shown next to it.
///
/// Exactly one of `on_click_link` and `callback_function` is meaningful:
/// a non-empty link wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericButton {
    pub header_text: String,
    pub content_text: String,
    pub footer_text: String,
    /// Text displayed on the button
    pub button_text: String,
    pub picture_url: String,
    /// URL opened on click (instead of a callback)
    pub on_click_link: String,
    /// Action name echoed back by the platform when clicked
    pub callback_function: String,
    /// Opaque parameters echoed back verbatim with the click
    pub callback_infos: BTreeMap<String, String>,
}

impl GenericButton {
    pub fn is_link(&self) -> bool {
        !self.on_click_link.is_empty()
    }
}
