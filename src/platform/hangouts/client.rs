use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::card::ChatMessage;
use crate::config::HangoutsConfig;

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post a new message into a space.
    async fn create(&self, space: &str, message: &ChatMessage) -> Result<ChatMessage>;

    /// Update an existing message. `update_mask` restricts which fields change.
    async fn update(
        &self,
        name: &str,
        message: &ChatMessage,
        update_mask: &str,
    ) -> Result<ChatMessage>;
}

/// Bearer token kept in a file that something outside this process refreshes.
/// Re-read on every request so rotations are picked up.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn bearer(&self) -> Result<String> {
        let token = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read access token: {}", self.path.display()))?;
        let token = token.trim();
        if token.is_empty() {
            anyhow::bail!("Access token file is empty: {}", self.path.display());
        }
        Ok(format!("Bearer {}", token))
    }
}

/// REST client for the Hangouts Chat API.
pub struct GoogleChatClient {
    client: reqwest::Client,
    base_url: String,
    token: TokenFile,
}

impl GoogleChatClient {
    pub fn new(config: &HangoutsConfig) -> Self {
        Self {
            client: crate::http::client(config.request_timeout()),
            base_url: config.chat_api_base.trim_end_matches('/').to_string(),
            token: TokenFile::new(&config.access_token_file),
        }
    }
}

#[async_trait]
impl ChatTransport for GoogleChatClient {
    async fn create(&self, space: &str, message: &ChatMessage) -> Result<ChatMessage> {
        let url = format!("{}/{}/messages", self.base_url, space);
        debug!("Creating message in {}", space);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.token.bearer().await?)
            .json(message)
            .send()
            .await
            .context("Failed to send message to Hangouts Chat")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Hangouts Chat API error ({}): {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse Hangouts Chat response")
    }

    async fn update(
        &self,
        name: &str,
        message: &ChatMessage,
        update_mask: &str,
    ) -> Result<ChatMessage> {
        let url = format!("{}/{}", self.base_url, name);
        debug!("Updating message {} ({})", name, update_mask);

        let response = self
            .client
            .put(&url)
            .query(&[("updateMask", update_mask)])
            .header("Authorization", self.token.bearer().await?)
            .json(message)
            .send()
            .await
            .context("Failed to send message update to Hangouts Chat")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Hangouts Chat API error ({}): {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse Hangouts Chat update response")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubsubMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub message_id: String,
}

impl PubsubMessage {
    pub fn decode_data(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .with_context(|| format!("Invalid base64 payload in message {}", self.message_id))
    }
}

/// Pull subscription that Hangouts Chat publishes its events to.
pub struct PubSubSubscription {
    client: reqwest::Client,
    base_url: String,
    path: String,
    token: TokenFile,
    max_messages: u32,
}

impl PubSubSubscription {
    pub fn new(config: &HangoutsConfig) -> Self {
        Self {
            client: crate::http::client(config.request_timeout()),
            base_url: config.pubsub_api_base.trim_end_matches('/').to_string(),
            path: format!(
                "projects/{}/subscriptions/{}",
                config.project, config.subscription
            ),
            token: TokenFile::new(&config.access_token_file),
            max_messages: config.max_messages,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fails if the subscription cannot be found.
    pub async fn ensure_exists(&self) -> Result<()> {
        let url = format!("{}/{}", self.base_url, self.path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.token.bearer().await?)
            .send()
            .await
            .context("Failed to check Pub/Sub subscription")?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("Pub/Sub subscription {} does not exist", self.path);
        }
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Pub/Sub API error ({}): {}", status, error_body);
        }
        Ok(())
    }

    /// Pull the next batch of messages. May return an empty batch.
    pub async fn pull(&self) -> Result<Vec<ReceivedMessage>> {
        let url = format!("{}/{}:pull", self.base_url, self.path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.token.bearer().await?)
            .json(&PullRequest {
                max_messages: self.max_messages,
            })
            .send()
            .await
            .context("Failed to pull from Pub/Sub")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Pub/Sub API error ({}): {}", status, error_body);
        }

        let pulled: PullResponse = response
            .json()
            .await
            .context("Failed to parse Pub/Sub pull response")?;
        Ok(pulled.received_messages)
    }

    pub async fn acknowledge(&self, ack_ids: &[String]) -> Result<()> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        let url = format!("{}/{}:acknowledge", self.base_url, self.path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.token.bearer().await?)
            .json(&AcknowledgeRequest { ack_ids })
            .send()
            .await
            .context("Failed to acknowledge Pub/Sub messages")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Pub/Sub API error ({}): {}", status, error_body);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer, token_file: &std::path::Path) -> HangoutsConfig {
        HangoutsConfig {
            project: "proj".to_string(),
            subscription: "sub".to_string(),
            access_token_file: token_file.to_path_buf(),
            chat_api_base: server.uri(),
            pubsub_api_base: server.uri(),
            ..Default::default()
        }
    }

    fn token_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "secret-token\n").unwrap();
        file
    }

    #[tokio::test]
    async fn test_token_file_is_trimmed() {
        let file = token_file();
        let token = TokenFile::new(file.path()).bearer().await.unwrap();
        assert_eq!(token, "Bearer secret-token");
    }

    #[tokio::test]
    async fn test_empty_token_file_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(TokenFile::new(file.path()).bearer().await.is_err());
    }

    #[tokio::test]
    async fn test_create_posts_to_space() {
        let server = MockServer::start().await;
        let token = token_file();
        Mock::given(method("POST"))
            .and(path("/spaces/AAA/messages"))
            .and(header("Authorization", "Bearer secret-token"))
            .and(body_json(json!({"text": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "spaces/AAA/messages/BBB",
                "text": "hello"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GoogleChatClient::new(&test_config(&server, token.path()));
        let sent = client
            .create("spaces/AAA", &ChatMessage::text("hello"))
            .await
            .unwrap();
        assert_eq!(sent.name.as_deref(), Some("spaces/AAA/messages/BBB"));
    }

    #[tokio::test]
    async fn test_update_uses_mask() {
        let server = MockServer::start().await;
        let token = token_file();
        Mock::given(method("PUT"))
            .and(path("/spaces/AAA/messages/BBB"))
            .and(query_param("updateMask", "cards"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = GoogleChatClient::new(&test_config(&server, token.path()));
        client
            .update("spaces/AAA/messages/BBB", &ChatMessage::default(), "cards")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_surfaces_api_errors() {
        let server = MockServer::start().await;
        let token = token_file();
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let client = GoogleChatClient::new(&test_config(&server, token.path()));
        let err = client
            .create("spaces/AAA", &ChatMessage::text("hello"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test]
    async fn test_pull_decodes_payloads() {
        let server = MockServer::start().await;
        let token = token_file();
        let payload = base64::engine::general_purpose::STANDARD.encode(r#"{"type":"MESSAGE"}"#);
        Mock::given(method("POST"))
            .and(path("/projects/proj/subscriptions/sub:pull"))
            .and(body_json(json!({"maxMessages": 10})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "receivedMessages": [
                    {"ackId": "ack-1", "message": {"data": payload, "messageId": "1"}}
                ]
            })))
            .mount(&server)
            .await;

        let sub = PubSubSubscription::new(&test_config(&server, token.path()));
        let pulled = sub.pull().await.unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].ack_id, "ack-1");
        assert_eq!(
            pulled[0].message.decode_data().unwrap(),
            br#"{"type":"MESSAGE"}"#.to_vec()
        );
    }

    #[tokio::test]
    async fn test_pull_empty_batch() {
        let server = MockServer::start().await;
        let token = token_file();
        Mock::given(method("POST"))
            .and(path("/projects/proj/subscriptions/sub:pull"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let sub = PubSubSubscription::new(&test_config(&server, token.path()));
        assert!(sub.pull().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hung_pull_times_out() {
        let server = MockServer::start().await;
        let token = token_file();
        Mock::given(method("POST"))
            .and(path("/projects/proj/subscriptions/sub:pull"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(std::time::Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let config = HangoutsConfig {
            request_timeout_secs: 1,
            ..test_config(&server, token.path())
        };
        let sub = PubSubSubscription::new(&config);
        let result = tokio::time::timeout(std::time::Duration::from_secs(10), sub.pull())
            .await
            .expect("pull should give up on its own");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_acknowledge_sends_ack_ids() {
        let server = MockServer::start().await;
        let token = token_file();
        Mock::given(method("POST"))
            .and(path("/projects/proj/subscriptions/sub:acknowledge"))
            .and(body_json(json!({"ackIds": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let sub = PubSubSubscription::new(&test_config(&server, token.path()));
        sub.acknowledge(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_subscription() {
        let server = MockServer::start().await;
        let token = token_file();
        Mock::given(method("GET"))
            .and(path("/projects/proj/subscriptions/sub"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let sub = PubSubSubscription::new(&test_config(&server, token.path()));
        let err = sub.ensure_exists().await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_invalid_base64_payload() {
        let msg = PubsubMessage {
            data: "!!not base64!!".to_string(),
            message_id: "7".to_string(),
        };
        assert!(msg.decode_data().is_err());
    }
}
