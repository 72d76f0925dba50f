use async_trait::async_trait;
use tracing::info;

use crate::channel::{Channel, DeliveryPayload, SendResult};

/// Logs the delivery instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct StdoutChannel;

#[async_trait]
impl Channel for StdoutChannel {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn send(&self, payload: &DeliveryPayload) -> SendResult {
        info!(
            channel = "stdout",
            campaign_id = %payload.campaign_id,
            subject_id = ?payload.subject_id,
            properties = %serde_json::Value::Object(payload.properties.clone()),
            "Deliver"
        );
        SendResult::ok()
    }
}
