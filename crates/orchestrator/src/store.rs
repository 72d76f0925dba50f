//! Campaign store collaborator.
//!
//! The orchestrator only needs predicate reads and status updates. The
//! in-memory implementation also publishes a change record for every
//! mutation, which is what feeds the streaming index.
//!
//! Production: back this with the campaign database and its replication log.

use std::sync::Arc;

use campaign_core::types::{
    Campaign, CampaignChange, CampaignId, CampaignStatus, ChangeOp, DeliveryKind,
};
use campaign_core::{CampaignError, CampaignResult};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Conjunctive predicate over campaign fields. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignQuery {
    pub status: Option<CampaignStatus>,
    pub kind: Option<DeliveryKind>,
    pub trigger_event: Option<String>,
    pub trigger_attribute: Option<String>,
    pub exception_event: Option<String>,
}

impl CampaignQuery {
    /// Active action-based campaigns triggered by `event_name`.
    pub fn event_triggered(event_name: &str) -> Self {
        Self {
            status: Some(CampaignStatus::Active),
            kind: Some(DeliveryKind::ActionBased),
            trigger_event: Some(event_name.to_string()),
            ..Default::default()
        }
    }

    /// Active action-based campaigns triggered by a change of `attribute_name`.
    pub fn attribute_triggered(attribute_name: &str) -> Self {
        Self {
            status: Some(CampaignStatus::Active),
            kind: Some(DeliveryKind::ActionBased),
            trigger_attribute: Some(attribute_name.to_string()),
            ..Default::default()
        }
    }

    /// Active action-based campaigns cancelled by `event_name`.
    pub fn excepted_by(event_name: &str) -> Self {
        Self {
            status: Some(CampaignStatus::Active),
            kind: Some(DeliveryKind::ActionBased),
            exception_event: Some(event_name.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, campaign: &Campaign) -> bool {
        self.status.map_or(true, |s| campaign.status == s)
            && self.kind.map_or(true, |k| campaign.kind() == k)
            && self
                .trigger_event
                .as_deref()
                .map_or(true, |e| campaign.trigger_event() == Some(e))
            && self
                .trigger_attribute
                .as_deref()
                .map_or(true, |a| campaign.trigger_attribute() == Some(a))
            && self
                .exception_event
                .as_deref()
                .map_or(true, |e| campaign.exception_event() == Some(e))
    }
}

pub trait CampaignStore: Send + Sync {
    fn find(&self, query: &CampaignQuery) -> CampaignResult<Vec<Campaign>>;

    fn get(&self, id: &str) -> CampaignResult<Option<Campaign>>;

    /// Returns the updated campaign, or `CampaignNotFound`.
    fn update_status(&self, id: &str, status: CampaignStatus) -> CampaignResult<Campaign>;
}

/// DashMap-backed store that publishes change records to subscribers.
#[derive(Default)]
pub struct InMemoryCampaignStore {
    campaigns: DashMap<CampaignId, Campaign>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<CampaignChange>>>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        info!("Campaign store initialized (in-memory)");
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Change records for every mutation from now on, in per-campaign order.
    pub fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<CampaignChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Insert a new campaign or replace an existing one.
    pub fn insert(&self, campaign: Campaign) {
        match self.campaigns.entry(campaign.id.clone()) {
            Entry::Occupied(mut entry) => {
                let before = entry.insert(campaign.clone());
                self.publish(CampaignChange::update(before, campaign));
            }
            Entry::Vacant(entry) => {
                debug!(campaign_id = %campaign.id, "Inserted campaign");
                entry.insert(campaign.clone());
                self.publish(CampaignChange::create(campaign));
            }
        }
    }

    /// Apply `mutate` to an existing campaign.
    pub fn update<F>(&self, id: &str, mutate: F) -> CampaignResult<Campaign>
    where
        F: FnOnce(&mut Campaign),
    {
        let mut entry = self
            .campaigns
            .get_mut(id)
            .ok_or_else(|| CampaignError::CampaignNotFound(id.to_string()))?;
        let before = entry.value().clone();
        let campaign = entry.value_mut();
        mutate(campaign);
        campaign.updated_at = Utc::now();
        let after = campaign.clone();
        self.publish(CampaignChange::update(before, after.clone()));
        Ok(after)
    }

    /// Remove a campaign. The change record is published before the entry
    /// is released, so records for one campaign never interleave.
    pub fn delete(&self, id: &str) -> Option<Campaign> {
        match self.campaigns.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                let removed = entry.get().clone();
                self.publish(CampaignChange::delete(removed.clone()));
                entry.remove();
                Some(removed)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Mirror a change record produced by an external store. The mirrored
    /// mutation is republished to this store's own subscribers.
    pub fn apply_change(&self, change: &CampaignChange) -> CampaignResult<()> {
        match change.op {
            ChangeOp::Create | ChangeOp::Update => {
                let campaign = change.after.clone().ok_or_else(|| {
                    CampaignError::Store("change record has no after-image".to_string())
                })?;
                self.insert(campaign);
            }
            ChangeOp::Delete => {
                let id = change.before.as_ref().map(|c| c.id.as_str()).ok_or_else(|| {
                    CampaignError::Store("delete record has no before-image".to_string())
                })?;
                self.delete(id);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }

    fn publish(&self, change: CampaignChange) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

impl CampaignStore for InMemoryCampaignStore {
    fn find(&self, query: &CampaignQuery) -> CampaignResult<Vec<Campaign>> {
        let mut found: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    fn get(&self, id: &str) -> CampaignResult<Option<Campaign>> {
        Ok(self.campaigns.get(id).map(|r| r.value().clone()))
    }

    fn update_status(&self, id: &str, status: CampaignStatus) -> CampaignResult<Campaign> {
        self.update(id, |campaign| campaign.status = status)
    }
}
