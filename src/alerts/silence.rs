use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const SILENCE_COMMENT: &str = "botanist snooze";

/// How long a snooze click silences the alert group.
pub fn silence_duration() -> Duration {
    Duration::hours(1)
}

/// An equality silence over a set of labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilenceRequest {
    pub labels: BTreeMap<String, String>,
    pub created_by: String,
    pub comment: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl SilenceRequest {
    /// Snooze silence starting `now`, requested by `created_by`.
    pub fn snooze(labels: BTreeMap<String, String>, created_by: &str, now: DateTime<Utc>) -> Self {
        Self {
            labels,
            created_by: created_by.to_string(),
            comment: SILENCE_COMMENT.to_string(),
            starts_at: now,
            ends_at: now + silence_duration(),
        }
    }
}

/// Creates silences in an alerting backend.
#[async_trait]
pub trait Silencer: Send + Sync {
    /// Returns the id of the created silence.
    async fn silence(&self, address: &str, request: &SilenceRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostableSilence<'a> {
    matchers: Vec<Matcher<'a>>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    created_by: &'a str,
    comment: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Matcher<'a> {
    name: &'a str,
    value: &'a str,
    is_regex: bool,
    is_equal: bool,
}

#[derive(Debug, Deserialize)]
struct SilenceResponse {
    #[serde(rename = "silenceID")]
    silence_id: String,
}

/// Client for the Alertmanager v2 API. The address comes with each call
/// since every alert batch names its own Alertmanager.
pub struct AlertmanagerClient {
    client: reqwest::Client,
}

impl AlertmanagerClient {
    /// `timeout` bounds each silence request, connect included.
    pub fn new(timeout: std::time::Duration) -> Self {
        Self {
            client: crate::http::client(timeout),
        }
    }
}

#[async_trait]
impl Silencer for AlertmanagerClient {
    async fn silence(&self, address: &str, request: &SilenceRequest) -> Result<String> {
        if address.is_empty() {
            anyhow::bail!("No Alertmanager address to silence against");
        }
        let url = format!("{}/api/v2/silences", address.trim_end_matches('/'));

        let body = PostableSilence {
            matchers: request
                .labels
                .iter()
                .map(|(name, value)| Matcher {
                    name,
                    value,
                    is_regex: false,
                    is_equal: true,
                })
                .collect(),
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            created_by: &request.created_by,
            comment: &request.comment,
        };

        debug!("Posting silence to {}", url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send silence to Alertmanager")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Alertmanager API error ({}): {}", status, error_body);
        }

        let created: SilenceResponse = response
            .json()
            .await
            .context("Failed to parse Alertmanager response")?;

        info!("Created silence {}", created.silence_id);
        Ok(created.silence_id)
    }
}
