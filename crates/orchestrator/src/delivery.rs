//! Delivery executor: what happens when a scheduled job fires.

use std::sync::Arc;

use async_trait::async_trait;
use campaign_channels::{ChannelRegistry, DeliveryPayload};
use campaign_core::event_bus::{make_event, noop_sink, EventSink};
use campaign_core::types::{Campaign, DeliveryEventType, SubjectAction};
use campaign_core::CampaignResult;
use campaign_scheduler::{DeliveryHandler, FiredJob, JobPayload};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::evaluators::{Qualification, SubjectContext};

pub struct DeliveryExecutor {
    registry: Arc<ChannelRegistry>,
    qualification: Qualification,
    event_sink: Arc<dyn EventSink>,
    node_id: String,
    /// Last successful send per `(campaign, subject)`.
    last_sent: DashMap<(String, String), DateTime<Utc>>,
}

impl DeliveryExecutor {
    pub fn new(registry: Arc<ChannelRegistry>, qualification: Qualification) -> Self {
        Self {
            registry,
            qualification,
            event_sink: noop_sink(),
            node_id: "local".to_string(),
            last_sent: DashMap::new(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Broadcast delivery for a scheduled campaign.
    pub async fn deliver_scheduled(&self, campaign: &Campaign) -> CampaignResult<bool> {
        let payload = DeliveryPayload {
            campaign_id: campaign.id.clone(),
            subject_id: None,
            properties: serde_json::Map::new(),
        };
        self.dispatch(campaign, payload).await
    }

    /// Delivery to one subject for an action-based campaign. With
    /// `re_eval_before_send` and a delay, qualification is checked again
    /// first and a subject who no longer qualifies is skipped.
    pub async fn deliver_action_based(
        &self,
        campaign: &Campaign,
        action: &SubjectAction,
    ) -> CampaignResult<bool> {
        let subject_id = action.subject_id();

        let re_evaluate = campaign
            .action_based()
            .is_some_and(|a| a.re_eval_before_send && a.delay.is_some());
        if re_evaluate
            && !self
                .qualification
                .evaluate(campaign, &SubjectContext::from_action(action))?
        {
            info!(
                campaign_id = %campaign.id,
                subject_id = %subject_id,
                "Subject no longer qualifies, delivery skipped"
            );
            self.emit(DeliveryEventType::Skipped, campaign, Some(subject_id), Some("requalification failed"));
            return Ok(false);
        }

        let payload = DeliveryPayload {
            campaign_id: campaign.id.clone(),
            subject_id: Some(subject_id.to_string()),
            properties: action.properties(),
        };
        let sent = self.dispatch(campaign, payload).await?;
        let cool_down = campaign.action_based().and_then(|a| a.re_eligible_secs);
        if sent && cool_down.is_some() {
            self.last_sent
                .insert((campaign.id.clone(), subject_id.to_string()), Utc::now());
        }
        Ok(sent)
    }

    /// Whether `subject_id` may receive `campaign` again at `now`. Without a
    /// cool-down a subject is always eligible. Sends recorded under an
    /// elapsed cool-down are forgotten here.
    pub fn is_eligible(&self, campaign: &Campaign, subject_id: &str, now: DateTime<Utc>) -> bool {
        let key = (campaign.id.clone(), subject_id.to_string());
        let Some(secs) = campaign.action_based().and_then(|a| a.re_eligible_secs) else {
            self.last_sent.remove(&key);
            return true;
        };
        let cool_down = TimeDelta::try_seconds(secs as i64).unwrap_or(TimeDelta::MAX);
        let expired = |last: &DateTime<Utc>| now.signed_duration_since(*last) >= cool_down;
        match self.last_sent.get(&key).map(|last| expired(last.value())) {
            Some(false) => false,
            Some(true) => {
                self.last_sent.remove_if(&key, |_, last| expired(last));
                true
            }
            None => true,
        }
    }

    pub fn emit(
        &self,
        event_type: DeliveryEventType,
        campaign: &Campaign,
        subject_id: Option<&str>,
        detail: Option<&str>,
    ) {
        let mut event = make_event(
            event_type,
            &campaign.id,
            subject_id.map(str::to_string),
            Some(campaign.channel.clone()),
        );
        event.node_id = self.node_id.clone();
        event.detail = detail.map(str::to_string);
        self.event_sink.emit(event);
    }

    async fn dispatch(&self, campaign: &Campaign, payload: DeliveryPayload) -> CampaignResult<bool> {
        let subject_id = payload.subject_id.clone();

        let result = match self.registry.send(&campaign.channel, &payload).await {
            Ok(result) => result,
            Err(e) => {
                self.emit(
                    DeliveryEventType::Failed,
                    campaign,
                    subject_id.as_deref(),
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        };

        if result.ok {
            info!(
                campaign_id = %campaign.id,
                subject_id = ?subject_id,
                channel = %campaign.channel,
                "Delivered campaign"
            );
            self.emit(DeliveryEventType::Sent, campaign, subject_id.as_deref(), None);
        } else {
            warn!(
                campaign_id = %campaign.id,
                subject_id = ?subject_id,
                channel = %campaign.channel,
                reason = %result.reason,
                "Delivery failed"
            );
            self.emit(
                DeliveryEventType::Failed,
                campaign,
                subject_id.as_deref(),
                Some(&result.reason),
            );
        }
        Ok(result.ok)
    }
}

#[async_trait]
impl DeliveryHandler for DeliveryExecutor {
    async fn on_fire(&self, job: FiredJob) -> CampaignResult<()> {
        match &job.payload {
            JobPayload::Scheduled { campaign } => {
                self.deliver_scheduled(campaign).await?;
            }
            JobPayload::ActionBased { campaign, action } => {
                self.deliver_action_based(campaign, action).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::InMemorySegmentDirectory;
    use async_trait::async_trait;
    use campaign_channels::{Channel, SendResult};
    use campaign_core::event_bus::capture_sink;
    use campaign_core::types::{
        ActionBasedDelivery, CampaignStatus, CampaignTarget, DelaySpec, Delivery, TriggerAction,
        UserEvent,
    };
    use campaign_core::CampaignError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<DeliveryPayload>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, payload: &DeliveryPayload) -> SendResult {
            self.sent.lock().push(payload.clone());
            SendResult::ok()
        }
    }

    fn campaign(channel: &str, re_eval: bool, segments: Vec<String>, cool_down: Option<u64>) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: "c1".into(),
            name: "c1".into(),
            status: CampaignStatus::Active,
            channel: channel.into(),
            delivery: Delivery::ActionBased(ActionBasedDelivery {
                trigger: TriggerAction::Event {
                    trigger_event: "event_A".into(),
                    property_filters: None,
                },
                delay: Some(DelaySpec::FixedOffset { seconds: 60 }),
                exception_event: None,
                start_time: now,
                end_time: None,
                re_eligible_secs: cool_down,
                re_eval_before_send: re_eval,
            }),
            target: CampaignTarget {
                target_segment_ids: segments,
                additional_filters: None,
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn action(subject: &str) -> SubjectAction {
        SubjectAction::Event(UserEvent {
            subject_id: subject.into(),
            event_name: "event_A".into(),
            properties: serde_json::Map::new(),
        })
    }

    fn setup() -> (
        DeliveryExecutor,
        Arc<RecordingChannel>,
        Arc<InMemorySegmentDirectory>,
        Arc<campaign_core::event_bus::CaptureSink>,
    ) {
        let channel = Arc::new(RecordingChannel::default());
        let registry = Arc::new(ChannelRegistry::builder().with_channel(channel.clone()).build());
        let directory = Arc::new(InMemorySegmentDirectory::new());
        let sink = capture_sink();
        let executor = DeliveryExecutor::new(registry, Qualification::standard(directory.clone()))
            .with_event_sink(sink.clone());
        (executor, channel, directory, sink)
    }

    #[tokio::test]
    async fn test_delivers_to_subject() {
        let (executor, channel, _, sink) = setup();
        let sent = executor
            .deliver_action_based(&campaign("recording", false, Vec::new(), None), &action("42"))
            .await
            .unwrap();

        assert!(sent);
        let payloads = channel.sent.lock();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].subject_id.as_deref(), Some("42"));
        assert_eq!(sink.count_type(DeliveryEventType::Sent), 1);
    }

    #[tokio::test]
    async fn test_requalification_skips_subject_who_left_segment() {
        let (executor, channel, directory, sink) = setup();
        let c = campaign("recording", true, vec!["vip".into()], None);

        assert!(!executor.deliver_action_based(&c, &action("42")).await.unwrap());
        assert!(channel.sent.lock().is_empty());
        assert_eq!(sink.count_type(DeliveryEventType::Skipped), 1);

        directory.add_member("vip", "42");
        assert!(executor.deliver_action_based(&c, &action("42")).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_channel_reports_failure() {
        let (executor, _, _, sink) = setup();
        let result = executor
            .deliver_action_based(&campaign("missing", false, Vec::new(), None), &action("42"))
            .await;

        assert!(matches!(result, Err(CampaignError::UnknownChannel(_))));
        assert_eq!(sink.count_type(DeliveryEventType::Failed), 1);
    }

    #[tokio::test]
    async fn test_re_eligibility_cool_down() {
        let (executor, _, _, _) = setup();
        let c = campaign("recording", false, Vec::new(), Some(3600));
        let now = Utc::now();

        assert!(executor.is_eligible(&c, "42", now));
        executor.deliver_action_based(&c, &action("42")).await.unwrap();
        assert!(!executor.is_eligible(&c, "42", Utc::now()));
        assert!(executor.is_eligible(&c, "42", Utc::now() + TimeDelta::hours(2)));
        assert!(executor.is_eligible(&c, "7", Utc::now()));

        let always = campaign("recording", false, Vec::new(), None);
        executor.deliver_action_based(&always, &action("42")).await.unwrap();
        assert!(executor.is_eligible(&always, "42", Utc::now()));
    }

    #[tokio::test]
    async fn test_sends_without_cool_down_are_not_tracked() {
        let (executor, channel, _, _) = setup();
        let c = campaign("recording", false, Vec::new(), None);

        for subject in 0..100 {
            let sent = executor
                .deliver_action_based(&c, &action(&subject.to_string()))
                .await
                .unwrap();
            assert!(sent);
        }
        assert_eq!(channel.sent.lock().len(), 100);
        assert!(executor.last_sent.is_empty());
    }

    #[tokio::test]
    async fn test_elapsed_cool_down_is_forgotten() {
        let (executor, _, _, _) = setup();
        let c = campaign("recording", false, Vec::new(), Some(60));

        executor.deliver_action_based(&c, &action("42")).await.unwrap();
        assert_eq!(executor.last_sent.len(), 1);

        assert!(!executor.is_eligible(&c, "42", Utc::now()));
        assert_eq!(executor.last_sent.len(), 1);

        assert!(executor.is_eligible(&c, "42", Utc::now() + TimeDelta::minutes(2)));
        assert!(executor.last_sent.is_empty());
    }
}
