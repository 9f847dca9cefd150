//! HTTP listener Alertmanager posts its webhook notifications to.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use tracing::{debug, error, info};

use super::{AlertRelay, WebhookMessage};

pub fn router(relay: Arc<AlertRelay>) -> Router {
    Router::new()
        .route("/alert", post(receive_alert))
        .with_state(relay)
}

/// Serve the webhook listener until the process exits.
pub async fn serve(listen: SocketAddr, relay: Arc<AlertRelay>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind alert listener on {}", listen))?;
    info!("Starting prometheus receiver on {}", listen);

    axum::serve(listener, router(relay))
        .await
        .context("Alert listener stopped")
}

async fn receive_alert(State(relay): State<Arc<AlertRelay>>, body: Bytes) -> StatusCode {
    let msg: WebhookMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(e) => {
            error!("Failed to decode alert webhook body: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let Some(alerts) = msg.alerts.as_ref() else {
        error!("Alert webhook without alerts - refusing to continue");
        return StatusCode::BAD_REQUEST;
    };
    debug!(
        "Webhook for receiver {} contains {} alert(s)",
        msg.receiver,
        alerts.len()
    );

    relay.relay(&msg).await;
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandRouter;
    use crate::config::AlertSubscriberMap;
    use crate::directory::SubscriberDirectory;
    use crate::platform::hangouts::HangoutsPlatform;
    use crate::testing::{userinfo, FakeSilencer, MemoryStore, RecordingTransport};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const PAYLOAD: &str = r#"{
        "receiver": "infra",
        "status": "firing",
        "commonLabels": {"alertname": "DiskFull"},
        "externalURL": "http://alertmanager:9093",
        "alerts": [{
            "status": "firing",
            "labels": {"instance": "db1"},
            "annotations": {"summary": "disk full"},
            "generatorURL": "http://x"
        }]
    }"#;

    async fn app() -> (Router, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let directory =
            SubscriberDirectory::new(AlertSubscriberMap::new(), Arc::new(MemoryStore::default()));
        directory
            .add("infra", &userinfo("spaces/A", "Alice"))
            .await
            .unwrap();
        let platform = Arc::new(HangoutsPlatform::new(
            transport.clone(),
            directory,
            CommandRouter::with_default_commands().unwrap(),
            Arc::new(FakeSilencer::default()),
        ));
        (router(Arc::new(AlertRelay::new(platform))), transport)
    }

    fn post_alert(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/alert")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_not_allowed() {
        let (app, _) = app().await;
        let req = Request::builder()
            .method("GET")
            .uri("/alert")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_valid_alert_is_relayed() {
        let (app, transport) = app().await;
        let resp = app.oneshot(post_alert(PAYLOAD)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let created = transport.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, "spaces/A");
        assert_eq!(created[0].1.cards[0].sections.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_alerts_rejected_without_output() {
        let (app, transport) = app().await;
        let resp = app.oneshot(post_alert(r#"{"abc": ""}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(transport.created().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_rejected() {
        let (app, transport) = app().await;
        let resp = app.oneshot(post_alert("{not json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(transport.created().is_empty());
    }
}
