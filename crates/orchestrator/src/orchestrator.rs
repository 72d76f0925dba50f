//! Campaign orchestrator: turns user events, attribute changes and routed
//! records into scheduled or cancelled deliveries, and drives campaign
//! activation.
//!
//! Per-campaign failures are logged and counted as skipped; they never stop
//! the remaining campaigns of the same event from being processed.

use std::sync::Arc;

use anyhow::anyhow;
use campaign_core::types::{
    Campaign, CampaignStatus, Delivery, DeliveryEventType, SubjectAction, TriggerAction,
    UserAttribute, UserEvent,
};
use campaign_core::{CampaignError, CampaignResult};
use campaign_routing::{InterestKind, RoutedRecord};
use campaign_scheduler::{DeliveryHandler, DeliveryScheduler, ScheduleOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::delivery::DeliveryExecutor;
use crate::evaluators::{Qualification, SegmentDirectory, SubjectContext};
use crate::store::{CampaignQuery, CampaignStore};

/// What one inbound notification did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandleSummary {
    pub scheduled: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl HandleSummary {
    fn absorb(&mut self, other: HandleSummary) {
        self.scheduled += other.scheduled;
        self.cancelled += other.cancelled;
        self.skipped += other.skipped;
    }
}

pub struct CampaignOrchestrator {
    store: Arc<dyn CampaignStore>,
    scheduler: DeliveryScheduler,
    qualification: Qualification,
    directory: Arc<dyn SegmentDirectory>,
    executor: Arc<DeliveryExecutor>,
}

impl CampaignOrchestrator {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        scheduler: DeliveryScheduler,
        qualification: Qualification,
        directory: Arc<dyn SegmentDirectory>,
        executor: Arc<DeliveryExecutor>,
    ) -> Self {
        Self {
            store,
            scheduler,
            qualification,
            directory,
            executor,
        }
    }

    pub fn scheduler(&self) -> &DeliveryScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn CampaignStore> {
        &self.store
    }

    /// Schedule deliveries for campaigns triggered by the event, then cancel
    /// pending deliveries of campaigns the event is an exception for.
    pub fn handle_user_event(&self, event: &UserEvent) -> CampaignResult<HandleSummary> {
        if event.subject_id.is_empty() {
            return Err(CampaignError::MissingSubject(event.event_name.clone()));
        }

        let mut summary = HandleSummary::default();
        let action = SubjectAction::Event(event.clone());

        // A failed lookup skips only its own pass.
        let triggered = CampaignQuery::event_triggered(&event.event_name);
        for campaign in self.find_or_skip(&triggered, &mut summary) {
            summary.absorb(self.trigger(&campaign, &action));
        }

        let excepted = CampaignQuery::excepted_by(&event.event_name);
        for campaign in self.find_or_skip(&excepted, &mut summary) {
            if self.cancel(&campaign, &event.subject_id) {
                summary.cancelled += 1;
            }
        }

        debug!(
            event_name = %event.event_name,
            subject_id = %event.subject_id,
            scheduled = summary.scheduled,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            "Handled user event"
        );
        Ok(summary)
    }

    /// Record the new attribute value and schedule deliveries for campaigns
    /// triggered by it. Attribute changes never cancel anything.
    pub fn handle_user_attribute(&self, attribute: &UserAttribute) -> CampaignResult<HandleSummary> {
        if attribute.subject_id.is_empty() {
            return Err(CampaignError::MissingSubject(attribute.attribute_name.clone()));
        }

        self.directory.record_attribute(attribute);

        let mut summary = HandleSummary::default();
        let action = SubjectAction::Attribute(attribute.clone());
        let candidates = self
            .store
            .find(&CampaignQuery::attribute_triggered(&attribute.attribute_name))?;

        for campaign in candidates {
            if !attribute_value_matches(&campaign, &attribute.value) {
                summary.skipped += 1;
                continue;
            }
            summary.absorb(self.trigger(&campaign, &action));
        }

        Ok(summary)
    }

    fn find_or_skip(&self, query: &CampaignQuery, summary: &mut HandleSummary) -> Vec<Campaign> {
        match self.store.find(query) {
            Ok(found) => found,
            Err(e) => {
                warn!(query = ?query, error = %e, "Campaign lookup failed");
                metrics::counter!("orchestrator.lookup_errors").increment(1);
                summary.skipped += 1;
                Vec::new()
            }
        }
    }

    /// Sink for the streaming router's output.
    pub fn handle_routed(&self, record: &RoutedRecord) -> CampaignResult<HandleSummary> {
        let Some(campaign) = self.store.get(&record.campaign_id)? else {
            warn!(campaign_id = %record.campaign_id, "Routed record for unknown campaign");
            return Ok(HandleSummary {
                skipped: 1,
                ..Default::default()
            });
        };

        match record.kind {
            InterestKind::Trigger => {
                if !campaign.is_active() {
                    return Ok(HandleSummary {
                        skipped: 1,
                        ..Default::default()
                    });
                }
                let action = SubjectAction::Event(record.event.clone());
                Ok(self.trigger(&campaign, &action))
            }
            InterestKind::Exception => Ok(HandleSummary {
                cancelled: usize::from(self.cancel(&campaign, record.subject_id())),
                ..Default::default()
            }),
        }
    }

    /// Set the campaign active and, for scheduled campaigns, register its job.
    pub fn activate(&self, campaign_id: &str) -> CampaignResult<Campaign> {
        let campaign = self.store.update_status(campaign_id, CampaignStatus::Active)?;
        info!(campaign_id = %campaign.id, kind = ?campaign.kind(), "Campaign activated");

        if matches!(campaign.delivery, Delivery::Scheduled(_)) {
            self.launch(&campaign, None)?;
        }
        Ok(campaign)
    }

    /// Move a campaign out of `active` and drop its scheduled-delivery job.
    pub fn deactivate(&self, campaign_id: &str, status: CampaignStatus) -> CampaignResult<Campaign> {
        if status == CampaignStatus::Active {
            return Err(CampaignError::Internal(anyhow!(
                "deactivate requires a non-active status"
            )));
        }
        let campaign = self.store.update_status(campaign_id, status)?;
        self.scheduler.remove(&campaign.id, None);
        info!(campaign_id = %campaign.id, status = ?status, "Campaign deactivated");
        Ok(campaign)
    }

    /// Register the campaign's delivery job. Action-based campaigns need the
    /// subject action that triggered them.
    pub fn launch(
        &self,
        campaign: &Campaign,
        action: Option<SubjectAction>,
    ) -> CampaignResult<ScheduleOutcome> {
        let handler: Arc<dyn DeliveryHandler> = self.executor.clone();
        match &campaign.delivery {
            Delivery::Scheduled(_) => {
                let outcome = self.scheduler.schedule_scheduled_delivery(campaign, handler)?;
                if matches!(outcome, ScheduleOutcome::Scheduled { .. }) {
                    self.executor
                        .emit(DeliveryEventType::Scheduled, campaign, None, None);
                }
                Ok(outcome)
            }
            Delivery::ActionBased(_) => {
                let action = action.ok_or_else(|| CampaignError::MissingSubject(campaign.id.clone()))?;
                let subject_id = action.subject_id().to_string();
                let outcome = self
                    .scheduler
                    .schedule_action_based_delivery(campaign, action, handler)?;
                if matches!(outcome, ScheduleOutcome::Scheduled { .. }) {
                    self.executor
                        .emit(DeliveryEventType::Scheduled, campaign, Some(&subject_id), None);
                }
                Ok(outcome)
            }
        }
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn trigger(&self, campaign: &Campaign, action: &SubjectAction) -> HandleSummary {
        match self.try_schedule(campaign, action, Utc::now()) {
            Ok(true) => {
                metrics::counter!("orchestrator.deliveries_scheduled").increment(1);
                HandleSummary {
                    scheduled: 1,
                    ..Default::default()
                }
            }
            Ok(false) => {
                metrics::counter!("orchestrator.triggers_skipped").increment(1);
                HandleSummary {
                    skipped: 1,
                    ..Default::default()
                }
            }
            Err(e) => {
                metrics::counter!("orchestrator.trigger_errors").increment(1);
                warn!(
                    campaign_id = %campaign.id,
                    subject_id = %action.subject_id(),
                    error = %e,
                    "Failed to schedule delivery"
                );
                HandleSummary {
                    skipped: 1,
                    ..Default::default()
                }
            }
        }
    }

    fn try_schedule(
        &self,
        campaign: &Campaign,
        action: &SubjectAction,
        now: DateTime<Utc>,
    ) -> CampaignResult<bool> {
        let subject_id = action.subject_id();

        if !within_window(campaign, now) {
            debug!(campaign_id = %campaign.id, "Outside campaign window");
            return Ok(false);
        }
        if !self.executor.is_eligible(campaign, subject_id, now) {
            debug!(campaign_id = %campaign.id, subject_id = %subject_id, "Subject not yet re-eligible");
            return Ok(false);
        }
        if !self
            .qualification
            .evaluate(campaign, &SubjectContext::from_action(action))?
        {
            return Ok(false);
        }

        let handler: Arc<dyn DeliveryHandler> = self.executor.clone();
        let outcome = self
            .scheduler
            .schedule_action_based_if_absent(campaign, action.clone(), handler)?;

        match outcome {
            ScheduleOutcome::Scheduled { .. } => {
                self.executor
                    .emit(DeliveryEventType::Scheduled, campaign, Some(subject_id), None);
                Ok(true)
            }
            ScheduleOutcome::AlreadyScheduled | ScheduleOutcome::Expired => Ok(false),
        }
    }

    fn cancel(&self, campaign: &Campaign, subject_id: &str) -> bool {
        if !self.scheduler.remove(&campaign.id, Some(subject_id)) {
            return false;
        }
        metrics::counter!("orchestrator.deliveries_cancelled").increment(1);
        info!(campaign_id = %campaign.id, subject_id = %subject_id, "Cancelled pending delivery");
        self.executor
            .emit(DeliveryEventType::Cancelled, campaign, Some(subject_id), None);
        true
    }
}

/// Action-based campaigns trigger only inside `[start_time, end_time)`.
fn within_window(campaign: &Campaign, now: DateTime<Utc>) -> bool {
    match campaign.action_based() {
        Some(a) => a.start_time <= now && a.end_time.map_or(true, |end| now < end),
        None => true,
    }
}

/// Unset value means any change triggers.
fn attribute_value_matches(campaign: &Campaign, value: &serde_json::Value) -> bool {
    match campaign.action_based().map(|a| &a.trigger) {
        Some(TriggerAction::Attribute { value: expected, .. }) => {
            expected.as_ref().map_or(true, |expected| expected == value)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::InMemorySegmentDirectory;
    use crate::store::InMemoryCampaignStore;
    use campaign_channels::ChannelRegistry;
    use campaign_core::config::SchedulerConfig;
    use campaign_core::types::{ActionBasedDelivery, CampaignTarget, DelaySpec, ScheduledDelivery};
    use chrono::TimeDelta;
    use serde_json::json;

    struct Fixture {
        orchestrator: CampaignOrchestrator,
        store: Arc<InMemoryCampaignStore>,
    }

    fn fixture() -> Fixture {
        let store = InMemoryCampaignStore::shared();
        let directory = Arc::new(InMemorySegmentDirectory::new());
        let qualification = Qualification::standard(directory.clone());
        let registry = Arc::new(ChannelRegistry::builder().build());
        let executor = Arc::new(DeliveryExecutor::new(registry, qualification.clone()));
        let scheduler = DeliveryScheduler::new(&SchedulerConfig::default()).unwrap();
        Fixture {
            orchestrator: CampaignOrchestrator::new(
                store.clone(),
                scheduler,
                qualification,
                directory,
                executor,
            ),
            store,
        }
    }

    fn action_campaign(id: &str, trigger: TriggerAction, exception: Option<&str>) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: id.into(),
            name: id.into(),
            status: CampaignStatus::Active,
            channel: "stdout".into(),
            delivery: Delivery::ActionBased(ActionBasedDelivery {
                trigger,
                delay: Some(DelaySpec::FixedOffset { seconds: 3600 }),
                exception_event: exception.map(str::to_string),
                start_time: now - TimeDelta::hours(1),
                end_time: None,
                re_eligible_secs: None,
                re_eval_before_send: false,
            }),
            target: CampaignTarget::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn on_event(name: &str) -> TriggerAction {
        TriggerAction::Event {
            trigger_event: name.into(),
            property_filters: None,
        }
    }

    fn event(subject: &str, name: &str) -> UserEvent {
        UserEvent {
            subject_id: subject.into(),
            event_name: name.into(),
            properties: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_event_schedules_then_exception_cancels() {
        let f = fixture();
        f.store
            .insert(action_campaign("c3", on_event("event_A"), Some("event_B")));

        let summary = f.orchestrator.handle_user_event(&event("7", "event_A")).unwrap();
        assert_eq!(summary.scheduled, 1);
        assert!(f.orchestrator.scheduler().exists("c3", Some("7")));

        // A repeated trigger keeps the pending job.
        let summary = f.orchestrator.handle_user_event(&event("7", "event_A")).unwrap();
        assert_eq!(summary.skipped, 1);

        let summary = f.orchestrator.handle_user_event(&event("7", "event_B")).unwrap();
        assert_eq!(summary.cancelled, 1);
        assert!(!f.orchestrator.scheduler().exists("c3", Some("7")));

        // Cancelling again is a no-op.
        let summary = f.orchestrator.handle_user_event(&event("7", "event_B")).unwrap();
        assert_eq!(summary.cancelled, 0);
    }

    #[test]
    fn test_inactive_and_out_of_window_campaigns_ignored() {
        let f = fixture();
        let mut draft = action_campaign("draft", on_event("event_A"), None);
        draft.status = CampaignStatus::Draft;
        f.store.insert(draft);

        let mut ended = action_campaign("ended", on_event("event_A"), None);
        if let Delivery::ActionBased(a) = &mut ended.delivery {
            a.end_time = Some(Utc::now() - TimeDelta::minutes(1));
        }
        f.store.insert(ended);

        let summary = f.orchestrator.handle_user_event(&event("1", "event_A")).unwrap();
        assert_eq!(summary.scheduled, 0);
        assert_eq!(summary.skipped, 1);
        assert!(f.orchestrator.scheduler().is_empty());
    }

    #[test]
    fn test_attribute_trigger_matches_value() {
        let f = fixture();
        f.store.insert(action_campaign(
            "gold",
            TriggerAction::Attribute {
                attribute_name: "tier".into(),
                value: Some(json!("gold")),
            },
            None,
        ));
        f.store.insert(action_campaign(
            "any",
            TriggerAction::Attribute {
                attribute_name: "tier".into(),
                value: None,
            },
            None,
        ));

        let silver = UserAttribute {
            subject_id: "5".into(),
            attribute_name: "tier".into(),
            value: json!("silver"),
        };
        let summary = f.orchestrator.handle_user_attribute(&silver).unwrap();
        assert_eq!(summary.scheduled, 1);
        assert!(f.orchestrator.scheduler().exists("any", Some("5")));
        assert!(!f.orchestrator.scheduler().exists("gold", Some("5")));
    }

    #[test]
    fn test_missing_subject_rejected() {
        let f = fixture();
        let result = f.orchestrator.handle_user_event(&event("", "event_A"));
        assert!(matches!(result, Err(CampaignError::MissingSubject(_))));

        let campaign = action_campaign("c1", on_event("event_A"), None);
        let result = f.orchestrator.launch(&campaign, None);
        assert!(matches!(result, Err(CampaignError::MissingSubject(_))));
    }

    #[test]
    fn test_activate_and_deactivate_scheduled_campaign() {
        let f = fixture();
        let now = Utc::now();
        f.store.insert(Campaign {
            id: "s1".into(),
            name: "weekly digest".into(),
            status: CampaignStatus::Draft,
            channel: "stdout".into(),
            delivery: Delivery::Scheduled(ScheduledDelivery {
                schedule: Some(campaign_core::types::Recurrence {
                    frequency: campaign_core::types::Frequency::Weekly,
                    start_date: now + TimeDelta::days(1),
                    end_date: None,
                }),
            }),
            target: CampaignTarget::default(),
            created_at: now,
            updated_at: now,
        });

        let campaign = f.orchestrator.activate("s1").unwrap();
        assert!(campaign.is_active());
        assert!(f.orchestrator.scheduler().exists("s1", None));

        let campaign = f.orchestrator.deactivate("s1", CampaignStatus::Stopped).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Stopped);
        assert!(!f.orchestrator.scheduler().exists("s1", None));

        assert!(matches!(
            f.orchestrator.activate("missing"),
            Err(CampaignError::CampaignNotFound(_))
        ));
    }

    #[test]
    fn test_routed_records() {
        let f = fixture();
        f.store
            .insert(action_campaign("c3", on_event("event_A"), Some("event_B")));

        let trigger = RoutedRecord {
            kind: InterestKind::Trigger,
            campaign_id: "c3".into(),
            event: event("9", "event_A"),
        };
        assert_eq!(f.orchestrator.handle_routed(&trigger).unwrap().scheduled, 1);

        let exception = RoutedRecord {
            kind: InterestKind::Exception,
            campaign_id: "c3".into(),
            event: event("9", "event_B"),
        };
        assert_eq!(f.orchestrator.handle_routed(&exception).unwrap().cancelled, 1);

        let unknown = RoutedRecord {
            kind: InterestKind::Trigger,
            campaign_id: "gone".into(),
            event: event("9", "event_A"),
        };
        assert_eq!(f.orchestrator.handle_routed(&unknown).unwrap().skipped, 1);
    }

    struct TriggerLookupFails(Arc<InMemoryCampaignStore>);

    impl CampaignStore for TriggerLookupFails {
        fn find(&self, query: &CampaignQuery) -> CampaignResult<Vec<Campaign>> {
            if query.trigger_event.is_some() {
                return Err(CampaignError::Store("trigger index unavailable".into()));
            }
            self.0.find(query)
        }

        fn get(&self, id: &str) -> CampaignResult<Option<Campaign>> {
            self.0.get(id)
        }

        fn update_status(&self, id: &str, status: CampaignStatus) -> CampaignResult<Campaign> {
            self.0.update_status(id, status)
        }
    }

    #[test]
    fn test_failed_trigger_lookup_still_cancels() {
        let f = fixture();
        f.store
            .insert(action_campaign("c3", on_event("event_A"), Some("event_B")));
        f.store
            .insert(action_campaign("c4", on_event("event_B"), Some("event_C")));
        f.orchestrator.handle_user_event(&event("7", "event_A")).unwrap();
        assert!(f.orchestrator.scheduler().exists("c3", Some("7")));

        let directory = Arc::new(InMemorySegmentDirectory::new());
        let qualification = Qualification::standard(directory.clone());
        let executor = Arc::new(DeliveryExecutor::new(
            Arc::new(ChannelRegistry::builder().build()),
            qualification.clone(),
        ));
        let degraded = CampaignOrchestrator::new(
            Arc::new(TriggerLookupFails(f.store.clone())),
            f.orchestrator.scheduler().clone(),
            qualification,
            directory,
            executor,
        );

        let summary = degraded.handle_user_event(&event("7", "event_B")).unwrap();
        assert_eq!(summary.scheduled, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.cancelled, 1);
        assert!(!f.orchestrator.scheduler().exists("c3", Some("7")));
        assert!(!f.orchestrator.scheduler().exists("c4", Some("7")));
    }
}
