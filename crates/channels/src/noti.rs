//! Internal notification service channels.
//!
//! Each template maps to one endpoint of the notification service and its
//! request body shape. Requests are `PUT` with a JSON body.

use std::time::Duration;

use async_trait::async_trait;
use campaign_core::config::ChannelsConfig;
use serde_json::json;
use tracing::{debug, warn};

use crate::channel::{Channel, DeliveryPayload, SendResult};

/// Property carrying the inquiring organisation's display name.
const INQUIRY_ORG_PROPERTY: &str = "inquiry_org_name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotiTemplate {
    /// Template 10000 sends regardless of marketing consent.
    Send10000,
    Send10001,
}

impl NotiTemplate {
    pub fn channel_name(&self) -> &'static str {
        match self {
            NotiTemplate::Send10000 => "noti_10000",
            NotiTemplate::Send10001 => "noti_10001",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            NotiTemplate::Send10000 => "/noti/internal/v2/send/10000",
            NotiTemplate::Send10001 => "/noti/internal/v2/send/10001",
        }
    }

    /// Request body for `payload`. `None` when there is no subject to address.
    pub fn body(&self, payload: &DeliveryPayload) -> Option<serde_json::Value> {
        let user_id = payload.subject_id.as_deref()?;
        let mut body = json!({
            "userId": user_id,
            "properties": {
                "inqu_org_nm": payload.property_str(INQUIRY_ORG_PROPERTY),
            },
        });
        if *self == NotiTemplate::Send10000 {
            body["checkMktAgree"] = json!(false);
        }
        Some(body)
    }
}

pub struct NotiChannel {
    template: NotiTemplate,
    url: String,
    http_client: reqwest::Client,
}

impl NotiChannel {
    pub fn new(template: NotiTemplate, base_url: &str, http_client: reqwest::Client) -> Self {
        Self {
            template,
            url: format!("{}{}", base_url.trim_end_matches('/'), template.path()),
            http_client,
        }
    }

    /// Both notification channels sharing one HTTP client.
    pub fn from_config(config: &ChannelsConfig) -> Vec<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        [NotiTemplate::Send10000, NotiTemplate::Send10001]
            .into_iter()
            .map(|template| Self::new(template, &config.noti_base_url, http_client.clone()))
            .collect()
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Channel for NotiChannel {
    fn name(&self) -> &str {
        self.template.channel_name()
    }

    async fn send(&self, payload: &DeliveryPayload) -> SendResult {
        let Some(body) = self.template.body(payload) else {
            warn!(
                channel = self.name(),
                campaign_id = %payload.campaign_id,
                "Notification requires a subject, skipping"
            );
            return SendResult::failed("missing userId");
        };

        debug!(channel = self.name(), url = %self.url, body = %body, "Sending notification");

        match self.http_client.put(&self.url).json(&body).send().await {
            Ok(response) => {
                let status = response.status();
                let reason = status
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .to_string();
                if status.is_success() {
                    SendResult { ok: true, reason }
                } else {
                    warn!(
                        channel = self.name(),
                        status = status.as_u16(),
                        body = %body,
                        "Notification service rejected request"
                    );
                    SendResult::failed(reason)
                }
            }
            Err(e) => {
                warn!(channel = self.name(), error = %e, "Notification request failed");
                SendResult::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Json;
    use axum::routing::put;
    use axum::Router;
    use tokio::sync::mpsc;

    fn payload(subject: Option<&str>) -> DeliveryPayload {
        let mut properties = serde_json::Map::new();
        properties.insert(INQUIRY_ORG_PROPERTY.into(), json!("Acme Bank"));
        DeliveryPayload {
            campaign_id: "c1".into(),
            subject_id: subject.map(str::to_string),
            properties,
        }
    }

    #[test]
    fn test_body_10000_includes_consent_flag() {
        let body = NotiTemplate::Send10000.body(&payload(Some("42"))).unwrap();
        assert_eq!(
            body,
            json!({
                "userId": "42",
                "properties": {"inqu_org_nm": "Acme Bank"},
                "checkMktAgree": false
            })
        );
    }

    #[test]
    fn test_body_10001() {
        let body = NotiTemplate::Send10001.body(&payload(Some("42"))).unwrap();
        assert_eq!(
            body,
            json!({"userId": "42", "properties": {"inqu_org_nm": "Acme Bank"}})
        );
    }

    #[test]
    fn test_body_without_subject() {
        assert!(NotiTemplate::Send10000.body(&payload(None)).is_none());
    }

    #[test]
    fn test_url_joins_base() {
        let channel = NotiChannel::new(
            NotiTemplate::Send10001,
            "http://noti.internal/",
            reqwest::Client::new(),
        );
        assert_eq!(channel.url(), "http://noti.internal/noti/internal/v2/send/10001");
        assert_eq!(channel.name(), "noti_10001");
    }

    #[tokio::test]
    async fn test_send_puts_json_body() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/noti/internal/v2/send/10000",
            put(move |Json(body): Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let channel = NotiChannel::new(
            NotiTemplate::Send10000,
            &format!("http://{}", addr),
            reqwest::Client::new(),
        );
        let result = channel.send(&payload(Some("42"))).await;

        assert!(result.ok);
        let received = rx.recv().await.unwrap();
        assert_eq!(received["userId"], "42");
        assert_eq!(received["checkMktAgree"], false);
    }

    #[tokio::test]
    async fn test_send_without_subject_fails() {
        let channel = NotiChannel::new(
            NotiTemplate::Send10000,
            "http://127.0.0.1:9",
            reqwest::Client::new(),
        );
        let result = channel.send(&payload(None)).await;
        assert!(!result.ok);
        assert_eq!(result.reason, "missing userId");
    }
}
