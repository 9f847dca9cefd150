use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::Userinfo;

/// Alert group name -> (message path -> subscriber).
pub type AlertSubscriberMap = BTreeMap<String, BTreeMap<String, Userinfo>>;

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    pub hangouts: HangoutsConfig,
    #[serde(default)]
    pub alertmanager: AlertmanagerConfig,
}

/// Connection properties for Hangouts Chat plus the persisted alert groups.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HangoutsConfig {
    /// Google Cloud project owning the Pub/Sub subscription
    #[serde(default)]
    pub project: String,
    /// Pub/Sub subscription configured for Hangouts Chat
    #[serde(default)]
    pub subscription: String,
    /// File holding a bearer token for the Chat and Pub/Sub APIs
    #[serde(default)]
    pub access_token_file: PathBuf,
    #[serde(default = "default_chat_api_base")]
    pub chat_api_base: String,
    #[serde(default = "default_pubsub_api_base")]
    pub pubsub_api_base: String,
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    /// Upper bound for one Chat or Pub/Sub request, pulls included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Who to "annoy" about which alerts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub alert_subscribers: AlertSubscriberMap,
}

impl Default for HangoutsConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            subscription: String::new(),
            access_token_file: PathBuf::new(),
            chat_api_base: default_chat_api_base(),
            pubsub_api_base: default_pubsub_api_base(),
            max_messages: default_max_messages(),
            request_timeout_secs: default_request_timeout_secs(),
            alert_subscribers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AlertmanagerConfig {
    /// Address the alert webhook listener binds to
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Upper bound for one silence request. A snooze click waits this long
    /// at most before the next click can be handled.
    #[serde(default = "default_silence_timeout_secs")]
    pub silence_timeout_secs: u64,
}

impl Default for AlertmanagerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            silence_timeout_secs: default_silence_timeout_secs(),
        }
    }
}

fn default_chat_api_base() -> String {
    "https://chat.googleapis.com/v1".to_string()
}

fn default_pubsub_api_base() -> String {
    "https://pubsub.googleapis.com/v1".to_string()
}

fn default_max_messages() -> u32 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_silence_timeout_secs() -> u64 {
    10
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8081))
}

impl HangoutsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AlertmanagerConfig {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.hangouts.project.is_empty() || config.hangouts.subscription.is_empty() {
            anyhow::bail!("[hangouts] project and subscription must both be set");
        }
        if config.hangouts.request_timeout_secs == 0
            || config.alertmanager.silence_timeout_secs == 0
        {
            anyhow::bail!("Request timeouts must be at least one second");
        }

        Ok(config)
    }

    /// Write the whole configuration back, readable by the owner only.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let tmp = path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", tmp.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("Failed to restrict permissions: {}", tmp.display()))?;
        }

        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace config file: {}", path.display()))?;
        Ok(())
    }
}
