//! NATS stream sources. Subscribe to the campaign change subject and the
//! user-event subject and hand decoded messages to the caller.

use campaign_core::config::NatsConfig;
use campaign_core::types::{CampaignChange, UserEvent};
use campaign_core::CampaignResult;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

const QUEUE_GROUP: &str = "campaign-routers";

/// Connect to NATS with the configured reconnect budget.
pub async fn connect(config: &NatsConfig) -> anyhow::Result<async_nats::Client> {
    let client = async_nats::ConnectOptions::new()
        .max_reconnects(Some(config.max_reconnects))
        .connect(config.url.as_str())
        .await?;
    info!(url = %config.url, "Connected to NATS");
    Ok(client)
}

/// Consume CDC change records and hand each one to `apply`.
pub fn spawn_change_consumer<F>(
    client: async_nats::Client,
    subject: String,
    apply: F,
) -> JoinHandle<()>
where
    F: FnMut(CampaignChange) -> CampaignResult<()> + Send + 'static,
{
    tokio::spawn(async move {
        // Change records must be applied in log order, so no queue group.
        let subscriber = match client.subscribe(subject.clone()).await {
            Ok(sub) => sub,
            Err(e) => {
                error!(subject = %subject, error = %e, "Failed to subscribe to change subject");
                return;
            }
        };
        info!(subject = %subject, "Change consumer started");

        consume(subscriber, &subject, apply).await;
    })
}

/// Consume user events and hand each one to `forward`.
pub fn spawn_event_consumer<F>(
    client: async_nats::Client,
    subject: String,
    forward: F,
) -> JoinHandle<()>
where
    F: FnMut(UserEvent) -> CampaignResult<()> + Send + 'static,
{
    tokio::spawn(async move {
        let subscriber = match client
            .queue_subscribe(subject.clone(), QUEUE_GROUP.to_string())
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                error!(subject = %subject, error = %e, "Failed to subscribe to event subject");
                return;
            }
        };
        info!(subject = %subject, "Event consumer started");

        consume(subscriber, &subject, forward).await;
    })
}

async fn consume<T, F>(mut subscriber: async_nats::Subscriber, subject: &str, mut forward: F)
where
    T: DeserializeOwned,
    F: FnMut(T) -> CampaignResult<()>,
{
    while let Some(msg) = subscriber.next().await {
        let decoded: T = match decode(&msg.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(subject = %subject, error = %e, "Failed to deserialize message");
                metrics::counter!("routing.deserialize_errors").increment(1);
                continue;
            }
        };

        if let Err(e) = forward(decoded) {
            error!(subject = %subject, error = %e, "Failed to handle message");
            metrics::counter!("routing.forward_errors").increment(1);
        }
    }

    warn!(subject = %subject, "NATS subscription ended");
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> CampaignResult<T> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::ChangeOp;

    #[test]
    fn test_decode_change_record() {
        let payload = serde_json::json!({
            "op": "d",
            "before": null,
            "after": null
        });
        let change: CampaignChange = decode(payload.to_string().as_bytes()).unwrap();
        assert_eq!(change.op, ChangeOp::Delete);
    }

    #[test]
    fn test_decode_user_event_without_properties() {
        let event: UserEvent =
            decode(br#"{"subject_id":"42","event_name":"event_A"}"#).unwrap();
        assert_eq!(event.subject_id, "42");
        assert!(event.properties.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode::<UserEvent>(b"not json"),
            Err(campaign_core::CampaignError::Serialization(_))
        ));
    }
}
