//! gRPC notification service.
//!
//! Message and service definitions are written by hand in the shape
//! `tonic-build` would generate for `campaign.relay.v1`.

use std::sync::Arc;

use campaign_core::types::{UserAttribute, UserEvent};
use tonic::{Request, Response, Status};
use tracing::error;

use crate::ingress::{validate_user_attribute, validate_user_event, EventIngress};

pub mod campaign_proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct UserEventMessage {
        #[prost(string, tag = "1")]
        pub subject_id: String,
        #[prost(string, tag = "2")]
        pub event_name: String,
        /// JSON object of event properties. Empty means no properties.
        #[prost(string, tag = "3")]
        pub properties_json: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct UserAttributeMessage {
        #[prost(string, tag = "1")]
        pub subject_id: String,
        #[prost(string, tag = "2")]
        pub attribute_name: String,
        #[prost(string, tag = "3")]
        pub value_json: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct NotifyResponse {
        #[prost(bool, tag = "1")]
        pub success: bool,
        #[prost(string, tag = "2")]
        pub reason: String,
    }
}

use campaign_proto::*;

/// Notification endpoints. Processing failures are reported in the
/// response body; only undecodable payloads become a gRPC status.
#[tonic::async_trait]
pub trait CampaignServiceServer: Send + Sync + 'static {
    async fn notify_user_event(
        &self,
        request: Request<UserEventMessage>,
    ) -> Result<Response<NotifyResponse>, Status>;

    async fn notify_user_attribute(
        &self,
        request: Request<UserAttributeMessage>,
    ) -> Result<Response<NotifyResponse>, Status>;
}

pub struct CampaignServiceImpl {
    ingress: Arc<EventIngress>,
}

impl CampaignServiceImpl {
    pub fn new(ingress: Arc<EventIngress>) -> Self {
        Self { ingress }
    }
}

#[tonic::async_trait]
impl CampaignServiceServer for CampaignServiceImpl {
    async fn notify_user_event(
        &self,
        request: Request<UserEventMessage>,
    ) -> Result<Response<NotifyResponse>, Status> {
        let message = request.into_inner();
        let properties = if message.properties_json.is_empty() {
            serde_json::Map::new()
        } else {
            serde_json::from_str(&message.properties_json)
                .map_err(|e| Status::invalid_argument(format!("Invalid properties JSON: {}", e)))?
        };
        let event = UserEvent {
            subject_id: message.subject_id,
            event_name: message.event_name,
            properties,
        };

        if let Err(msg) = validate_user_event(&event) {
            metrics::counter!("api.validation_errors").increment(1);
            return Ok(Response::new(failed(msg.to_string())));
        }

        metrics::counter!("api.events_received").increment(1);
        Ok(Response::new(match self.ingress.notify_user_event(event) {
            Ok(()) => ok(),
            Err(e) => {
                error!(error = %e, "gRPC user event processing failed");
                metrics::counter!("api.errors").increment(1);
                failed(e.to_string())
            }
        }))
    }

    async fn notify_user_attribute(
        &self,
        request: Request<UserAttributeMessage>,
    ) -> Result<Response<NotifyResponse>, Status> {
        let message = request.into_inner();
        let value = if message.value_json.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&message.value_json)
                .map_err(|e| Status::invalid_argument(format!("Invalid value JSON: {}", e)))?
        };
        let attribute = UserAttribute {
            subject_id: message.subject_id,
            attribute_name: message.attribute_name,
            value,
        };

        if let Err(msg) = validate_user_attribute(&attribute) {
            metrics::counter!("api.validation_errors").increment(1);
            return Ok(Response::new(failed(msg.to_string())));
        }

        metrics::counter!("api.attributes_received").increment(1);
        Ok(Response::new(match self.ingress.notify_user_attribute(attribute) {
            Ok(()) => ok(),
            Err(e) => {
                error!(error = %e, "gRPC user attribute processing failed");
                metrics::counter!("api.errors").increment(1);
                failed(e.to_string())
            }
        }))
    }
}

fn ok() -> NotifyResponse {
    NotifyResponse {
        success: true,
        reason: "OK".to_string(),
    }
}

fn failed(reason: String) -> NotifyResponse {
    NotifyResponse {
        success: false,
        reason,
    }
}
