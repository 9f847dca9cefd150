use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::{AlertSubscriberMap, Config};
use crate::platform::Userinfo;

/// Group whose members receive every alert regardless of receiver.
pub const ALL_GROUP: &str = "all";

/// Where directory snapshots are written after every change.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn persist(&self, snapshot: &AlertSubscriberMap) -> Result<()>;
}

/// Persists the directory by rewriting the config file it was loaded from.
pub struct ConfigFileStore {
    path: PathBuf,
    base: Config,
}

impl ConfigFileStore {
    pub fn new(path: impl Into<PathBuf>, base: Config) -> Self {
        Self {
            path: path.into(),
            base,
        }
    }
}

#[async_trait]
impl DirectoryStore for ConfigFileStore {
    async fn persist(&self, snapshot: &AlertSubscriberMap) -> Result<()> {
        let mut config = self.base.clone();
        config.hangouts.alert_subscribers = snapshot.clone();
        config.save(&self.path).await
    }
}

/// Maps alert group names to their subscribers.
///
/// Membership is a set keyed by message path. Readers run concurrently, one
/// mutation at a time. Each mutation is persisted after it is applied in
/// memory; a persistence failure is returned but the in-memory change stays.
#[derive(Clone)]
pub struct SubscriberDirectory {
    groups: Arc<RwLock<AlertSubscriberMap>>,
    store: Arc<dyn DirectoryStore>,
    /// One writer at a time, each writing the map as it is at write time.
    persist_lock: Arc<Mutex<()>>,
}

impl SubscriberDirectory {
    pub fn new(initial: AlertSubscriberMap, store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            groups: Arc::new(RwLock::new(initial)),
            store,
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Members of `group` together with the members of the "all" group.
    /// Unknown groups resolve to an empty list.
    pub async fn lookup(&self, group: &str) -> Vec<Userinfo> {
        let groups = self.groups.read().await;
        let mut members: Vec<Userinfo> = Vec::new();
        for name in [group, ALL_GROUP] {
            if let Some(users) = groups.get(name) {
                for user in users.values() {
                    if !members.iter().any(|m| m.message_path == user.message_path) {
                        members.push(user.clone());
                    }
                }
            }
        }
        members
    }

    pub async fn add(&self, group: &str, user: &Userinfo) -> Result<()> {
        self.groups
            .write()
            .await
            .entry(group.to_string())
            .or_default()
            .insert(user.message_path.clone(), user.clone());
        debug!("Added {} to alert group {}", user.message_path, group);
        self.persist().await
    }

    /// Removing from an unknown group, or removing a non-member, is a no-op.
    pub async fn remove(&self, group: &str, user: &Userinfo) -> Result<()> {
        {
            let mut groups = self.groups.write().await;
            let Some(members) = groups.get_mut(group) else {
                return Ok(());
            };
            if members.remove(&user.message_path).is_none() {
                return Ok(());
            }
            if members.is_empty() {
                groups.remove(group);
            }
        }
        debug!("Removed {} from alert group {}", user.message_path, group);
        self.persist().await
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }

    /// The snapshot is taken under the persist lock, so a write never
    /// carries an older state than the write before it.
    async fn persist(&self) -> Result<()> {
        let _writer = self.persist_lock.lock().await;
        let snapshot = self.groups.read().await.clone();
        self.store.persist(&snapshot).await
    }
}
