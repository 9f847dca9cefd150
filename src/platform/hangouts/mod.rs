pub mod card;
pub mod client;
pub mod events;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use self::card::{ActionResponse, CardHeader, ChatMessage};
use self::client::{ChatTransport, PubSubSubscription, PubsubMessage};
use self::events::{ChatEvent, EventAction, EventType};
use crate::alerts::silence::{SilenceRequest, Silencer};
use crate::alerts::{ADDRESS_PARAM, LABELS_PARAM, SNOOZE_CALLBACK};
use crate::click_guard::{parse_event_time, ClickError, ClickGuard};
use crate::commands::CommandRouter;
use crate::directory::SubscriberDirectory;
use crate::platform::{AlertSubscribers, GenericMessage, User, Userinfo};

const PULL_RETRY_DELAY: Duration = Duration::from_secs(5);
const SILENCED_TITLE: &str = "SILENCED!";

/// A Hangouts Chat space (room or DM) we can talk to.
#[derive(Clone)]
pub struct HangoutsUser {
    info: Userinfo,
    transport: Arc<dyn ChatTransport>,
    directory: SubscriberDirectory,
}

impl HangoutsUser {
    pub fn new(
        info: Userinfo,
        transport: Arc<dyn ChatTransport>,
        directory: SubscriberDirectory,
    ) -> Self {
        Self {
            info,
            transport,
            directory,
        }
    }
}

impl fmt::Debug for HangoutsUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HangoutsUser")
            .field("info", &self.info)
            .finish()
    }
}

#[async_trait]
impl User for HangoutsUser {
    fn user_info(&self) -> &Userinfo {
        &self.info
    }

    async fn send_message(&self, msg: &GenericMessage) -> Result<()> {
        let message = card::to_chat_message(msg).in_thread(&msg.thread);
        self.transport
            .create(&self.info.message_path, &message)
            .await?;
        Ok(())
    }

    async fn add_to_alert_group(&self, group: &str) -> Result<()> {
        self.directory.add(group, &self.info).await
    }

    async fn del_from_alert_group(&self, group: &str) -> Result<()> {
        self.directory.remove(group, &self.info).await
    }
}

/// Hangouts Chat backend: turns chat events into command replies and
/// snooze clicks into silences.
pub struct HangoutsPlatform {
    transport: Arc<dyn ChatTransport>,
    directory: SubscriberDirectory,
    router: CommandRouter,
    silencer: Arc<dyn Silencer>,
    clicks: ClickGuard,
}

impl HangoutsPlatform {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        directory: SubscriberDirectory,
        router: CommandRouter,
        silencer: Arc<dyn Silencer>,
    ) -> Self {
        Self {
            transport,
            directory,
            router,
            silencer,
            clicks: ClickGuard::new(),
        }
    }

    pub fn user(&self, info: Userinfo) -> HangoutsUser {
        HangoutsUser::new(info, self.transport.clone(), self.directory.clone())
    }

    /// Pull events until the process stops. Each event is handled on its
    /// own task; failures are logged and never end the loop.
    pub async fn run(self: Arc<Self>, subscription: PubSubSubscription) -> Result<()> {
        subscription.ensure_exists().await?;
        info!("Listening for Hangouts Chat events on {}", subscription.path());

        loop {
            let batch = match subscription.pull().await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("Error when receiving pubsub messages: {:#}", e);
                    tokio::time::sleep(PULL_RETRY_DELAY).await;
                    continue;
                }
            };
            if batch.is_empty() {
                continue;
            }

            let ack_ids: Vec<String> = batch.iter().map(|m| m.ack_id.clone()).collect();
            if let Err(e) = subscription.acknowledge(&ack_ids).await {
                warn!("Failed to acknowledge {} message(s): {:#}", ack_ids.len(), e);
            }

            for received in batch {
                let platform = self.clone();
                tokio::spawn(async move {
                    match decode_event(&received.message) {
                        Ok(event) => platform.process_event(&event).await,
                        Err(e) => warn!("Dropping undecodable chat event: {:#}", e),
                    }
                });
            }
        }
    }

    /// React to one event and post the reply, if any, into the event's space.
    pub async fn process_event(&self, event: &ChatEvent) {
        let Some(reply) = self.react_to_event(event).await else {
            return;
        };

        let space = event.space_name();
        if space.is_empty() {
            warn!("No space to reply to for {} event", event.event_type);
            return;
        }
        match self.transport.create(space, &reply).await {
            Ok(sent) => debug!("Hangouts response: {:?}", sent.name),
            Err(e) => warn!(
                "There was an error sending a response back to Hangouts Chat: {:#}",
                e
            ),
        }
    }

    pub async fn react_to_event(&self, event: &ChatEvent) -> Option<ChatMessage> {
        debug!("Received {} event in {}", event.event_type, event.space_name());
        match event.kind() {
            EventType::AddedToSpace => {
                Some(ChatMessage::text("Thanks for adding me").in_thread(event.thread_name()))
            }
            EventType::Message => self.handle_message(event).await,
            EventType::CardClicked => self.handle_click(event).await,
            EventType::RemovedFromSpace => None,
            EventType::Other(kind) => {
                warn!("Message type {} not implemented!", kind);
                None
            }
        }
    }

    async fn handle_message(&self, event: &ChatEvent) -> Option<ChatMessage> {
        let Some(message) = event.message.as_ref() else {
            warn!("MESSAGE event without a message");
            return None;
        };

        let sender = self.user(Userinfo {
            message_path: event.space_name().to_string(),
            username: event.user.as_ref().map(|u| u.name.clone()).unwrap_or_default(),
            friendly_name: event.display_name().to_string(),
        });
        let text = message
            .argument_text
            .as_deref()
            .or(message.text.as_deref())
            .unwrap_or_default();
        let message_path = message
            .space
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_else(|| event.space_name().to_string());

        let incoming = GenericMessage {
            content_text: text.trim().to_string(),
            thread: event.thread_name().to_string(),
            message_path,
            sender: Some(Arc::new(sender)),
            ..Default::default()
        };

        let reply = match self.router.handle(&incoming).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Command {:?} failed: {:#}", incoming.content_text, e.cause);
                e.reply
            }
        };
        Some(card::to_chat_message(&reply).in_thread(&reply.thread))
    }

    async fn handle_click(&self, event: &ChatEvent) -> Option<ChatMessage> {
        let Some(action) = event.action.as_ref() else {
            warn!("CARD_CLICKED event without an action");
            return None;
        };
        if action.action_method_name != SNOOZE_CALLBACK {
            warn!("Unknown card action {}", action.action_method_name);
            return None;
        }

        match self.silence_from_click(event, action).await {
            Ok(reply) => Some(reply),
            Err(ClickError::Duplicate(_)) => None,
            Err(e @ ClickError::InvalidTimestamp { .. }) => {
                warn!("Rejecting click: {}", e);
                None
            }
            Err(e) => {
                warn!("Could not silence alert: {}", e);
                Some(
                    ChatMessage::text(format!(
                        "There was an error silencing this alert: \n {}",
                        e
                    ))
                    .in_thread(event.thread_name()),
                )
            }
        }
    }

    async fn silence_from_click(
        &self,
        event: &ChatEvent,
        action: &EventAction,
    ) -> Result<ChatMessage, ClickError> {
        let event_time = parse_event_time(&event.event_time)?;

        let mut cursor = self.clicks.lock().await;
        cursor.check(event_time)?;

        let requester = event.display_name();
        info!(
            "User {} instructed me to execute {}",
            requester, action.action_method_name
        );

        let infos = action.callback_infos();
        let labels = infos
            .get(LABELS_PARAM)
            .ok_or(ClickError::MissingParameter(LABELS_PARAM))?;
        let labels: BTreeMap<String, String> = serde_json::from_str(labels)?;
        let address = infos
            .get(ADDRESS_PARAM)
            .ok_or(ClickError::MissingParameter(ADDRESS_PARAM))?;

        let request = SilenceRequest::snooze(labels, requester, Utc::now());
        let silence_id = self
            .silencer
            .silence(address, &request)
            .await
            .map_err(ClickError::Silence)?;
        cursor.commit(event_time);
        drop(cursor);

        info!("Silence {} created for {}", silence_id, requester);
        self.mark_silenced(event).await;

        Ok(
            ChatMessage::text(format!("{} silenced an alarm for an hour", requester))
                .in_thread(event.thread_name()),
        )
    }

    /// Retitle the clicked card so others see the alert is handled.
    async fn mark_silenced(&self, event: &ChatEvent) {
        let Some(mut message) = event.message.clone() else {
            return;
        };
        let Some(name) = message.name.clone() else {
            return;
        };

        message.action_response = Some(ActionResponse {
            response_type: "UPDATE_MESSAGE".to_string(),
        });
        if let Some(card) = message.cards.first_mut() {
            card.header
                .get_or_insert_with(CardHeader::default)
                .title = SILENCED_TITLE.to_string();
        }

        match self.transport.update(&name, &message, "cards").await {
            Ok(_) => debug!("Sent message update for {}", name),
            Err(e) => warn!("Failed to update silenced alert card {}: {:#}", name, e),
        }
    }
}

#[async_trait]
impl AlertSubscribers for HangoutsPlatform {
    async fn users_for_alert_group(&self, group: &str) -> Vec<Arc<dyn User>> {
        self.directory
            .lookup(group)
            .await
            .into_iter()
            .map(|info| Arc::new(self.user(info)) as Arc<dyn User>)
            .collect()
    }
}

fn decode_event(message: &PubsubMessage) -> Result<ChatEvent> {
    let data = message.decode_data()?;
    debug!("Received message {}", String::from_utf8_lossy(&data));
    serde_json::from_slice(&data)
        .with_context(|| format!("Unable to decode chat event {}", message.message_id))
}
