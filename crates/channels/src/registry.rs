//! Channel registry: channel identifier → channel. Built once, read-only
//! afterwards, so it can be shared behind an `Arc` without locking.

use std::collections::HashMap;
use std::sync::Arc;

use campaign_core::config::ChannelsConfig;
use campaign_core::{CampaignError, CampaignResult};
use tracing::{debug, info};

use crate::channel::{Channel, DeliveryPayload, SendResult};
use crate::noti::NotiChannel;
use crate::stdout::StdoutChannel;

pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn Channel>>,
}

#[derive(Default)]
pub struct ChannelRegistryBuilder {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its own name. A later channel with the same
    /// name replaces the earlier one.
    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.insert(channel.name().to_string(), channel);
        self
    }

    pub fn build(self) -> ChannelRegistry {
        let mut names: Vec<&String> = self.channels.keys().collect();
        names.sort();
        info!(channels = ?names, "Channel registry initialized");
        ChannelRegistry {
            channels: self.channels,
        }
    }
}

impl ChannelRegistry {
    pub fn builder() -> ChannelRegistryBuilder {
        ChannelRegistryBuilder::new()
    }

    /// `stdout`, `noti_10000` and `noti_10001`.
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let mut builder = Self::builder().with_channel(Arc::new(StdoutChannel));
        for channel in NotiChannel::from_config(config) {
            builder = builder.with_channel(Arc::new(channel));
        }
        builder.build()
    }

    pub fn get(&self, channel_id: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(channel_id)
    }

    /// Sorted channel identifiers.
    pub fn available_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Send through the named channel. Unknown identifiers are an error;
    /// delivery failures come back as a non-ok [`SendResult`].
    pub async fn send(&self, channel_id: &str, payload: &DeliveryPayload) -> CampaignResult<SendResult> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or_else(|| CampaignError::UnknownChannel(channel_id.to_string()))?;

        let start = std::time::Instant::now();
        metrics::counter!("delivery.dispatched", "channel" => channel_id.to_string()).increment(1);

        let result = channel.send(payload).await;

        metrics::histogram!("delivery.latency_ms", "channel" => channel_id.to_string())
            .record(start.elapsed().as_millis() as f64);
        if !result.ok {
            metrics::counter!("delivery.failed", "channel" => channel_id.to_string()).increment(1);
        }
        debug!(
            channel = %channel_id,
            campaign_id = %payload.campaign_id,
            ok = result.ok,
            reason = %result.reason,
            "Dispatched delivery"
        );

        Ok(result)
    }
}
