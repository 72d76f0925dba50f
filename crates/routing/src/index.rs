//! Campaign index: per-event-name interest sets maintained from the campaign
//! change stream.
//!
//! Interest is only held while a campaign is active. Field edits on an
//! inactive campaign produce nothing; status transitions register or
//! unregister whatever the campaign currently names.

use std::collections::{BTreeSet, HashMap};

use campaign_core::types::{Campaign, CampaignChange, CampaignId, ChangeOp};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestKind {
    Trigger,
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Register,
    Unregister,
}

/// One register/unregister instruction for a single event name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestDelta {
    pub op: DeltaOp,
    pub kind: InterestKind,
    pub campaign_id: CampaignId,
    pub event_name: String,
}

impl InterestDelta {
    fn register(kind: InterestKind, campaign_id: &str, event_name: &str) -> Self {
        Self {
            op: DeltaOp::Register,
            kind,
            campaign_id: campaign_id.to_string(),
            event_name: event_name.to_string(),
        }
    }

    fn unregister(kind: InterestKind, campaign_id: &str, event_name: &str) -> Self {
        Self {
            op: DeltaOp::Unregister,
            kind,
            campaign_id: campaign_id.to_string(),
            event_name: event_name.to_string(),
        }
    }
}

/// Derive the ordered interest deltas implied by a change record.
///
/// Every event name the campaign references before or after the change is
/// compared on its resolved kind, so the index converges on the latest
/// snapshot even when trigger and exception share a name.
pub fn derive_deltas(change: &CampaignChange) -> Vec<InterestDelta> {
    let (before, after) = match change.op {
        ChangeOp::Create => (None, change.after.as_ref()),
        ChangeOp::Update => (change.before.as_ref(), change.after.as_ref()),
        ChangeOp::Delete => (change.before.as_ref(), None),
    };
    let before = before.filter(|c| c.is_active());
    let after = after.filter(|c| c.is_active());

    let mut names: Vec<&str> = Vec::new();
    for campaign in before.into_iter().chain(after) {
        for name in [campaign.trigger_event(), campaign.exception_event()]
            .into_iter()
            .flatten()
        {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    let mut deltas = Vec::new();
    for name in names {
        let was = before.and_then(|c| interest_kind(c, name).map(|kind| (kind, c)));
        let now = after.and_then(|c| interest_kind(c, name).map(|kind| (kind, c)));
        match (was, now) {
            (Some((old, _)), Some((new, c))) if old != new => {
                deltas.push(InterestDelta::register(new, &c.id, name));
            }
            (None, Some((new, c))) => {
                deltas.push(InterestDelta::register(new, &c.id, name));
            }
            (Some((old, c)), None) => {
                deltas.push(InterestDelta::unregister(old, &c.id, name));
            }
            _ => {}
        }
    }
    deltas
}

/// How `campaign` is interested in `event_name`. An event that is both the
/// trigger and the exception counts as an exception.
fn interest_kind(campaign: &Campaign, event_name: &str) -> Option<InterestKind> {
    if campaign.exception_event() == Some(event_name) {
        Some(InterestKind::Exception)
    } else if campaign.trigger_event() == Some(event_name) {
        Some(InterestKind::Trigger)
    } else {
        None
    }
}

/// Interest sets for one event name. A campaign ID is in at most one set.
#[derive(Debug, Default, Clone)]
pub struct EventInterestState {
    trigger: BTreeSet<CampaignId>,
    exception: BTreeSet<CampaignId>,
}

impl EventInterestState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Registering under one kind drops the ID from the other.
    pub fn register(&mut self, kind: InterestKind, campaign_id: &str) {
        let (target, other) = match kind {
            InterestKind::Trigger => (&mut self.trigger, &mut self.exception),
            InterestKind::Exception => (&mut self.exception, &mut self.trigger),
        };
        other.remove(campaign_id);
        target.insert(campaign_id.to_string());
    }

    /// Removing an absent ID is a no-op.
    pub fn unregister(&mut self, kind: InterestKind, campaign_id: &str) {
        match kind {
            InterestKind::Trigger => self.trigger.remove(campaign_id),
            InterestKind::Exception => self.exception.remove(campaign_id),
        };
    }

    pub fn is_empty(&self) -> bool {
        self.trigger.is_empty() && self.exception.is_empty()
    }

    pub fn snapshot(&self) -> Interest {
        Interest {
            trigger_campaign_ids: self.trigger.iter().cloned().collect(),
            exception_campaign_ids: self.exception.iter().cloned().collect(),
        }
    }
}

/// Read-only view of the interest for one event name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub trigger_campaign_ids: Vec<CampaignId>,
    pub exception_campaign_ids: Vec<CampaignId>,
}

impl Interest {
    pub fn is_empty(&self) -> bool {
        self.trigger_campaign_ids.is_empty() && self.exception_campaign_ids.is_empty()
    }
}

/// Event name → interest state. Entries are created on first reference and
/// never removed; an entry whose sets are both empty is inert.
#[derive(Debug, Default)]
pub struct CampaignIndex {
    states: HashMap<String, EventInterestState>,
}

impl CampaignIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_change(&mut self, change: &CampaignChange) {
        for delta in derive_deltas(change) {
            self.apply_delta(&delta);
        }
    }

    pub fn apply_delta(&mut self, delta: &InterestDelta) {
        let state = self
            .states
            .entry(delta.event_name.clone())
            .or_insert_with(EventInterestState::new);

        match delta.op {
            DeltaOp::Register => state.register(delta.kind, &delta.campaign_id),
            DeltaOp::Unregister => state.unregister(delta.kind, &delta.campaign_id),
        }

        metrics::counter!("index.deltas_applied").increment(1);
        debug!(
            event_name = %delta.event_name,
            campaign_id = %delta.campaign_id,
            op = ?delta.op,
            kind = ?delta.kind,
            "Applied interest delta"
        );
    }

    /// Empty interest if the event name was never referenced.
    pub fn interest_for(&self, event_name: &str) -> Interest {
        self.states
            .get(event_name)
            .map(EventInterestState::snapshot)
            .unwrap_or_default()
    }

    /// Number of event names ever referenced.
    pub fn event_names(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::{
        ActionBasedDelivery, CampaignStatus, CampaignTarget, Delivery, TriggerAction,
    };
    use chrono::Utc;

    fn campaign(id: &str, status: CampaignStatus, trigger: &str, exception: Option<&str>) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: id.to_string(),
            name: id.to_string(),
            status,
            channel: "stdout".to_string(),
            delivery: Delivery::ActionBased(ActionBasedDelivery {
                trigger: TriggerAction::Event {
                    trigger_event: trigger.to_string(),
                    property_filters: None,
                },
                delay: None,
                exception_event: exception.map(str::to_string),
                start_time: now,
                end_time: None,
                re_eligible_secs: None,
                re_eval_before_send: false,
            }),
            target: CampaignTarget::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_create_registers_trigger_and_exception() {
        let mut index = CampaignIndex::new();
        index.apply_change(&CampaignChange::create(campaign(
            "c3",
            CampaignStatus::Active,
            "event_A",
            Some("event_B"),
        )));

        assert_eq!(index.interest_for("event_A").trigger_campaign_ids, ids(&["c3"]));
        assert_eq!(index.interest_for("event_B").exception_campaign_ids, ids(&["c3"]));
        assert!(index.interest_for("event_X").is_empty());
    }

    #[test]
    fn test_inactive_create_registers_nothing() {
        let deltas = derive_deltas(&CampaignChange::create(campaign(
            "c1",
            CampaignStatus::Draft,
            "event_A",
            None,
        )));
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_trigger_rename_moves_interest() {
        let mut index = CampaignIndex::new();
        let v1 = campaign("c1", CampaignStatus::Active, "event_A", None);
        let v2 = campaign("c1", CampaignStatus::Active, "event_C", None);

        index.apply_change(&CampaignChange::create(v1.clone()));
        let deltas = derive_deltas(&CampaignChange::update(v1.clone(), v2.clone()));
        assert_eq!(
            deltas,
            vec![
                InterestDelta::unregister(InterestKind::Trigger, "c1", "event_A"),
                InterestDelta::register(InterestKind::Trigger, "c1", "event_C"),
            ]
        );

        index.apply_change(&CampaignChange::update(v1, v2));
        assert!(index.interest_for("event_A").is_empty());
        assert_eq!(index.interest_for("event_C").trigger_campaign_ids, ids(&["c1"]));
    }

    #[test]
    fn test_status_transitions() {
        let mut index = CampaignIndex::new();
        let draft = campaign("c1", CampaignStatus::Draft, "event_A", Some("event_B"));
        let active = campaign("c1", CampaignStatus::Active, "event_A", Some("event_B"));
        let stopped = campaign("c1", CampaignStatus::Stopped, "event_A", Some("event_B"));

        index.apply_change(&CampaignChange::create(draft.clone()));
        assert!(index.interest_for("event_A").is_empty());

        index.apply_change(&CampaignChange::update(draft, active.clone()));
        assert_eq!(index.interest_for("event_A").trigger_campaign_ids, ids(&["c1"]));
        assert_eq!(index.interest_for("event_B").exception_campaign_ids, ids(&["c1"]));

        index.apply_change(&CampaignChange::update(active, stopped));
        assert!(index.interest_for("event_A").is_empty());
        assert!(index.interest_for("event_B").is_empty());
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut state = EventInterestState::new();
        state.register(InterestKind::Trigger, "c1");
        state.register(InterestKind::Trigger, "c1");
        assert_eq!(state.snapshot().trigger_campaign_ids, ids(&["c1"]));

        state.unregister(InterestKind::Trigger, "c1");
        state.unregister(InterestKind::Trigger, "c1");
        state.unregister(InterestKind::Exception, "never");
        assert!(state.is_empty());
    }

    #[test]
    fn test_id_in_at_most_one_set() {
        let mut state = EventInterestState::new();
        state.register(InterestKind::Trigger, "c1");
        state.register(InterestKind::Exception, "c1");

        let interest = state.snapshot();
        assert!(interest.trigger_campaign_ids.is_empty());
        assert_eq!(interest.exception_campaign_ids, ids(&["c1"]));
    }

    #[test]
    fn test_replay_converges_to_latest_state() {
        let v1 = campaign("c1", CampaignStatus::Active, "event_A", Some("event_B"));
        let v2 = campaign("c1", CampaignStatus::Active, "event_C", None);
        let v3 = campaign("c1", CampaignStatus::Stopped, "event_C", None);
        let v4 = campaign("c1", CampaignStatus::Active, "event_D", Some("event_B"));
        let other = campaign("c2", CampaignStatus::Active, "event_A", None);

        let history = vec![
            CampaignChange::create(v1.clone()),
            CampaignChange::create(other.clone()),
            CampaignChange::update(v1, v2.clone()),
            CampaignChange::update(v2, v3.clone()),
            CampaignChange::update(v3, v4),
            CampaignChange::delete(other),
        ];

        let mut once = CampaignIndex::new();
        let mut twice = CampaignIndex::new();
        for change in &history {
            once.apply_change(change);
        }
        for change in history.iter().chain(history.iter()) {
            twice.apply_change(change);
        }

        for index in [&once, &twice] {
            assert!(index.interest_for("event_A").is_empty());
            assert!(index.interest_for("event_C").is_empty());
            assert_eq!(index.interest_for("event_D").trigger_campaign_ids, ids(&["c1"]));
            assert_eq!(index.interest_for("event_B").exception_campaign_ids, ids(&["c1"]));
        }
    }

    #[test]
    fn test_exception_overlapping_trigger_is_released() {
        let v1 = campaign("c1", CampaignStatus::Active, "event_A", Some("event_B"));
        let v2 = campaign("c1", CampaignStatus::Active, "event_A", Some("event_A"));
        let v3 = campaign("c1", CampaignStatus::Active, "event_A", Some("event_C"));

        let mut index = CampaignIndex::new();
        index.apply_change(&CampaignChange::create(v1.clone()));
        index.apply_change(&CampaignChange::update(v1, v2.clone()));

        let overlapping = index.interest_for("event_A");
        assert!(overlapping.trigger_campaign_ids.is_empty());
        assert_eq!(overlapping.exception_campaign_ids, ids(&["c1"]));
        assert!(index.interest_for("event_B").is_empty());

        index.apply_change(&CampaignChange::update(v2, v3));
        let released = index.interest_for("event_A");
        assert_eq!(released.trigger_campaign_ids, ids(&["c1"]));
        assert!(released.exception_campaign_ids.is_empty());
        assert_eq!(index.interest_for("event_C").exception_campaign_ids, ids(&["c1"]));
    }

    #[test]
    fn test_trigger_renamed_onto_exception_and_deleted() {
        let v1 = campaign("c1", CampaignStatus::Active, "event_A", Some("event_B"));
        let v2 = campaign("c1", CampaignStatus::Active, "event_B", Some("event_B"));
        let v3 = campaign("c1", CampaignStatus::Active, "event_C", Some("event_B"));

        let mut index = CampaignIndex::new();
        index.apply_change(&CampaignChange::create(v1.clone()));
        index.apply_change(&CampaignChange::update(v1, v2.clone()));
        assert!(index.interest_for("event_A").is_empty());
        assert_eq!(index.interest_for("event_B").exception_campaign_ids, ids(&["c1"]));

        index.apply_change(&CampaignChange::update(v2, v3.clone()));
        assert_eq!(index.interest_for("event_B").exception_campaign_ids, ids(&["c1"]));
        assert_eq!(index.interest_for("event_C").trigger_campaign_ids, ids(&["c1"]));

        index.apply_change(&CampaignChange::delete(v3));
        assert!(index.interest_for("event_B").is_empty());
        assert!(index.interest_for("event_C").is_empty());
    }
}
