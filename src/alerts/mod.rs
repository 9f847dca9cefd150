pub mod silence;
pub mod webhook;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::platform::{AlertSubscribers, GenericButton, GenericMessage};

pub const SNOOZE_CALLBACK: &str = "prom_silence_1h";
/// Callback parameter carrying the JSON encoded common labels.
pub const LABELS_PARAM: &str = "labels";
/// Callback parameter carrying the Alertmanager external URL.
pub const ADDRESS_PARAM: &str = "alertMgrAddress";

const HEADER_TEXT: &str = "Prometheus alert";
const HEADER_PICTURE_URL: &str =
    "https://raw.githubusercontent.com/cncf/artwork/master/prometheus/icon/color/prometheus-icon-color.png";
const ALERT_BUTTON_TEXT: &str = "f()";

/// Alertmanager webhook payload.
#[allow(dead_code)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMessage {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub group_key: String,
    #[serde(default)]
    pub status: String,
    /// Alert group this batch is routed to
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub group_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(rename = "externalURL", default)]
    pub external_url: String,
    /// `None` when the payload had no alerts field at all.
    #[serde(default)]
    pub alerts: Option<Vec<Alert>>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub starts_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
    #[serde(rename = "generatorURL", default)]
    pub generator_url: String,
    #[serde(default)]
    pub fingerprint: String,
}

/// One button per alert linking to its generator, plus a trailing snooze
/// button whose callback carries everything needed to issue the silence.
pub fn build_message(msg: &WebhookMessage) -> GenericMessage {
    let mut buttons: Vec<GenericButton> = msg
        .alerts
        .iter()
        .flatten()
        .map(|alert| GenericButton {
            header_text: alert.status.clone(),
            content_text: alert.annotations.get("summary").cloned().unwrap_or_default(),
            footer_text: alert.labels.get("instance").cloned().unwrap_or_default(),
            button_text: ALERT_BUTTON_TEXT.to_string(),
            on_click_link: alert.generator_url.clone(),
            ..Default::default()
        })
        .collect();

    let labels = serde_json::to_string(&msg.common_labels).unwrap_or_else(|_| "{}".to_string());
    let mut callback_infos = BTreeMap::new();
    callback_infos.insert(LABELS_PARAM.to_string(), labels);
    callback_infos.insert(ADDRESS_PARAM.to_string(), msg.external_url.clone());

    buttons.push(GenericButton {
        content_text: "Snooze".to_string(),
        button_text: "Snooze 1h".to_string(),
        callback_function: SNOOZE_CALLBACK.to_string(),
        callback_infos,
        ..Default::default()
    });

    GenericMessage {
        header_text: HEADER_TEXT.to_string(),
        footer_text: format!("Alert for group {}", msg.receiver),
        header_picture_url: HEADER_PICTURE_URL.to_string(),
        buttons,
        ..Default::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers alert batches to every subscriber of the batch's receiver.
pub struct AlertRelay {
    subscribers: Arc<dyn AlertSubscribers>,
}

impl AlertRelay {
    pub fn new(subscribers: Arc<dyn AlertSubscribers>) -> Self {
        Self { subscribers }
    }

    /// Send the batch to each subscriber on its own; one failed delivery
    /// does not hold back the others.
    pub async fn relay(&self, msg: &WebhookMessage) -> RelayReport {
        let message = build_message(msg);
        let users = self.subscribers.users_for_alert_group(&msg.receiver).await;
        debug!(
            "Relaying {} alert(s) for {} to {} subscriber(s)",
            msg.alerts.as_ref().map_or(0, Vec::len),
            msg.receiver,
            users.len()
        );

        let sends = users.iter().map(|user| {
            let message = &message;
            async move {
                let result = user.send_message(message).await;
                if let Err(e) = &result {
                    warn!(
                        "Failed to deliver alert to {}: {:#}",
                        user.user_info().message_path,
                        e
                    );
                }
                result.is_ok()
            }
        });

        let mut report = RelayReport::default();
        for delivered in join_all(sends).await {
            if delivered {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }
        info!(
            "Alert for group {} delivered to {}, failed for {}",
            msg.receiver, report.delivered, report.failed
        );
        report
    }
}
