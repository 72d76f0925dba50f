use async_trait::async_trait;
use campaign_core::types::{CampaignId, SubjectId};
use serde::{Deserialize, Serialize};

/// What a channel delivers: the campaign, the subject (absent for scheduled
/// broadcasts) and the properties of the action that qualified them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub campaign_id: CampaignId,
    pub subject_id: Option<SubjectId>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl DeliveryPayload {
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub ok: bool,
    pub reason: String,
}

impl SendResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            reason: "OK".to_string(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
        }
    }
}

/// An outbound delivery channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Identifier campaigns refer to this channel by.
    fn name(&self) -> &str;

    /// Deliver one payload. Transport failures are reported in the result.
    async fn send(&self, payload: &DeliveryPayload) -> SendResult;
}
