//! Event router: joins a user event with the current interest for its name.

use campaign_core::types::{CampaignId, UserEvent};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::index::{Interest, InterestKind};

/// A trigger or cancellation produced for one campaign by one user event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedRecord {
    pub kind: InterestKind,
    pub campaign_id: CampaignId,
    pub event: UserEvent,
}

impl RoutedRecord {
    pub fn subject_id(&self) -> &str {
        &self.event.subject_id
    }
}

/// Stateless join step. State lives in the index; the router only reads it.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventRouter;

impl EventRouter {
    pub fn new() -> Self {
        Self
    }

    /// One trigger record per trigger-registered campaign, then one
    /// exception record per exception-registered campaign. Nothing when
    /// no campaign is interested.
    pub fn route(&self, interest: &Interest, event: &UserEvent) -> Vec<RoutedRecord> {
        if interest.is_empty() {
            metrics::counter!("router.events_dropped").increment(1);
            debug!(
                event_name = %event.event_name,
                subject_id = %event.subject_id,
                "No campaign interested, dropping event"
            );
            return Vec::new();
        }

        let triggers = interest
            .trigger_campaign_ids
            .iter()
            .map(|id| (InterestKind::Trigger, id));
        let exceptions = interest
            .exception_campaign_ids
            .iter()
            .map(|id| (InterestKind::Exception, id));

        let records: Vec<RoutedRecord> = triggers
            .chain(exceptions)
            .map(|(kind, campaign_id)| RoutedRecord {
                kind,
                campaign_id: campaign_id.clone(),
                event: event.clone(),
            })
            .collect();

        metrics::counter!("router.records_emitted").increment(records.len() as u64);
        records
    }
}
