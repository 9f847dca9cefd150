//! In-memory fakes for the collaborator traits, shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::alerts::silence::{SilenceRequest, Silencer};
use crate::config::AlertSubscriberMap;
use crate::directory::DirectoryStore;
use crate::platform::hangouts::card::ChatMessage;
use crate::platform::hangouts::client::ChatTransport;
use crate::platform::{GenericMessage, User, Userinfo};

pub fn userinfo(message_path: &str, name: &str) -> Userinfo {
    Userinfo {
        message_path: message_path.to_string(),
        username: name.to_lowercase(),
        friendly_name: name.to_string(),
    }
}

/// Keeps every persisted snapshot.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<Vec<AlertSubscriberMap>>,
    fail: bool,
    flaky: bool,
    attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Every other write fails, starting with the first.
    pub fn flaky() -> Self {
        Self {
            flaky: true,
            ..Default::default()
        }
    }

    pub fn snapshots(&self) -> Vec<AlertSubscriberMap> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<AlertSubscriberMap> {
        self.snapshots.lock().unwrap().last().cloned()
    }

    pub fn writes(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn persist(&self, snapshot: &AlertSubscriberMap) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail || (self.flaky && attempt % 2 == 0) {
            bail!("disk full");
        }
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

/// Records outbound chat traffic instead of calling the API.
#[derive(Default)]
pub struct RecordingTransport {
    created: Mutex<Vec<(String, ChatMessage)>>,
    updated: Mutex<Vec<(String, ChatMessage, String)>>,
    fail_for: Option<String>,
    fail_updates: bool,
}

impl RecordingTransport {
    /// Every `create` into `space` fails.
    pub fn failing_for(space: &str) -> Self {
        Self {
            fail_for: Some(space.to_string()),
            ..Default::default()
        }
    }

    pub fn failing_updates() -> Self {
        Self {
            fail_updates: true,
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<(String, ChatMessage)> {
        self.created.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<(String, ChatMessage, String)> {
        self.updated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn create(&self, space: &str, message: &ChatMessage) -> Result<ChatMessage> {
        if self.fail_for.as_deref() == Some(space) {
            bail!("space {} unreachable", space);
        }
        let mut created = self.created.lock().unwrap();
        created.push((space.to_string(), message.clone()));
        let mut sent = message.clone();
        sent.name = Some(format!("{}/messages/{}", space, created.len()));
        Ok(sent)
    }

    async fn update(
        &self,
        name: &str,
        message: &ChatMessage,
        update_mask: &str,
    ) -> Result<ChatMessage> {
        if self.fail_updates {
            bail!("message {} cannot be updated", name);
        }
        self.updated.lock().unwrap().push((
            name.to_string(),
            message.clone(),
            update_mask.to_string(),
        ));
        Ok(message.clone())
    }
}

#[derive(Default)]
pub struct FakeSilencer {
    calls: Mutex<Vec<(String, SilenceRequest)>>,
    fail: bool,
}

impl FakeSilencer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, SilenceRequest)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Silencer for FakeSilencer {
    async fn silence(&self, address: &str, request: &SilenceRequest) -> Result<String> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((address.to_string(), request.clone()));
        if self.fail {
            bail!("alertmanager unreachable");
        }
        Ok(format!("silence-{}", calls.len()))
    }
}

/// A user that only records group changes.
#[derive(Debug, Default)]
pub struct StaticUser {
    info: Userinfo,
    added: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    fail: bool,
}

impl StaticUser {
    pub fn new(message_path: &str, name: &str) -> Self {
        Self {
            info: userinfo(message_path, name),
            ..Default::default()
        }
    }

    pub fn shared(message_path: &str, name: &str) -> Arc<dyn User> {
        Arc::new(Self::new(message_path, name))
    }

    /// Group changes fail as if the directory could not be persisted.
    pub fn failing(message_path: &str, name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(message_path, name)
        }
    }

    pub fn added(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl User for StaticUser {
    fn user_info(&self) -> &Userinfo {
        &self.info
    }

    async fn send_message(&self, _msg: &GenericMessage) -> Result<()> {
        Ok(())
    }

    async fn add_to_alert_group(&self, group: &str) -> Result<()> {
        if self.fail {
            bail!("persistence unavailable");
        }
        self.added.lock().unwrap().push(group.to_string());
        Ok(())
    }

    async fn del_from_alert_group(&self, group: &str) -> Result<()> {
        if self.fail {
            bail!("persistence unavailable");
        }
        self.removed.lock().unwrap().push(group.to_string());
        Ok(())
    }
}
