use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CampaignId = String;
pub type SubjectId = String;

/// Lifecycle status of a campaign definition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Stopped,
    Archived,
    Idle,
}

/// A marketing campaign as read from the campaign store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    /// Identifier of the messaging channel the delivery goes out on.
    pub channel: String,
    pub delivery: Delivery,
    #[serde(default)]
    pub target: CampaignTarget,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Delivery kind. Exactly one of the kind-specific payloads exists per campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "delivery_type")]
pub enum Delivery {
    Scheduled(ScheduledDelivery),
    ActionBased(ActionBasedDelivery),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Scheduled,
    ActionBased,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduledDelivery {
    /// Send immediately if not set.
    #[serde(default)]
    pub schedule: Option<Recurrence>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recurrence {
    pub frequency: Frequency,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

/// Recurrence frequency. Unrecognised wire values are kept as `Unsupported`
/// so the failure surfaces when the schedule is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Monthly,
    Unsupported(String),
}

impl From<String> for Frequency {
    fn from(value: String) -> Self {
        match value.as_str() {
            "once" => Frequency::Once,
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            _ => Frequency::Unsupported(value),
        }
    }
}

impl From<Frequency> for String {
    fn from(value: Frequency) -> Self {
        match value {
            Frequency::Once => "once".to_string(),
            Frequency::Daily => "daily".to_string(),
            Frequency::Weekly => "weekly".to_string(),
            Frequency::Monthly => "monthly".to_string(),
            Frequency::Unsupported(other) => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionBasedDelivery {
    pub trigger: TriggerAction,
    /// Fire immediately if not set.
    #[serde(default)]
    pub delay: Option<DelaySpec>,
    #[serde(default)]
    pub exception_event: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Cool-down before the same subject can receive this campaign again.
    #[serde(default)]
    pub re_eligible_secs: Option<u64>,
    /// Re-evaluate segment membership at send time.
    #[serde(default)]
    pub re_eval_before_send: bool,
}

/// What makes an action-based campaign eligible to schedule a delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TriggerAction {
    Event {
        trigger_event: String,
        #[serde(default)]
        property_filters: Option<FilterSet>,
    },
    Attribute {
        attribute_name: String,
        /// Triggered only when the attribute changes to this value, if set.
        #[serde(default)]
        value: Option<serde_json::Value>,
    },
}

/// Rule converting a trigger moment into an absolute fire time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DelaySpec {
    FixedOffset { seconds: i64 },
    Calendar(CalendarRule),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarRule {
    pub op: CalendarOp,
    pub value: i64,
    pub at_time: NaiveTime,
}

/// Calendar delay operators:
/// - `weekday`: next `{value}` weekday (0 = Monday) at `{at_time}`
/// - `days`: `{value}` days later at `{at_time}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CalendarOp {
    NextWeekday,
    AddDays,
    Unsupported(String),
}

impl From<String> for CalendarOp {
    fn from(value: String) -> Self {
        match value.as_str() {
            "weekday" => CalendarOp::NextWeekday,
            "days" => CalendarOp::AddDays,
            _ => CalendarOp::Unsupported(value),
        }
    }
}

impl From<CalendarOp> for String {
    fn from(value: CalendarOp) -> Self {
        match value {
            CalendarOp::NextWeekday => "weekday".to_string(),
            CalendarOp::AddDays => "days".to_string(),
            CalendarOp::Unsupported(other) => other,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CampaignTarget {
    #[serde(default)]
    pub target_segment_ids: Vec<String>,
    #[serde(default)]
    pub additional_filters: Option<FilterSet>,
}

// ─── Filters ────────────────────────────────────────────────────────────────

/// AND-list of conditions; each item is a single filter or an OR-group.
pub type FilterSet = Vec<Condition>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Condition {
    Any { or: Vec<Filter> },
    Single(Filter),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub name: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub condition_value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    In,
    NotIn,
    Exists,
    NotExists,
}

// ─── Campaign accessors ─────────────────────────────────────────────────────

impl Campaign {
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }

    pub fn kind(&self) -> DeliveryKind {
        match self.delivery {
            Delivery::Scheduled(_) => DeliveryKind::Scheduled,
            Delivery::ActionBased(_) => DeliveryKind::ActionBased,
        }
    }

    pub fn action_based(&self) -> Option<&ActionBasedDelivery> {
        match &self.delivery {
            Delivery::ActionBased(action) => Some(action),
            Delivery::Scheduled(_) => None,
        }
    }

    /// Named event that triggers this campaign, for event-triggered campaigns.
    pub fn trigger_event(&self) -> Option<&str> {
        match self.action_based()?.trigger {
            TriggerAction::Event {
                ref trigger_event, ..
            } => Some(trigger_event.as_str()),
            TriggerAction::Attribute { .. } => None,
        }
    }

    /// Attribute whose change triggers this campaign, for attribute-triggered campaigns.
    pub fn trigger_attribute(&self) -> Option<&str> {
        match self.action_based()?.trigger {
            TriggerAction::Attribute {
                ref attribute_name,
                ..
            } => Some(attribute_name.as_str()),
            TriggerAction::Event { .. } => None,
        }
    }

    pub fn exception_event(&self) -> Option<&str> {
        self.action_based()?.exception_event.as_deref()
    }
}

// ─── Change data capture ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeOp {
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
}

/// A campaign definition change from the replication log.
/// `before` is absent on create, `after` is absent on delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignChange {
    pub op: ChangeOp,
    pub before: Option<Campaign>,
    pub after: Option<Campaign>,
}

impl CampaignChange {
    pub fn create(after: Campaign) -> Self {
        Self {
            op: ChangeOp::Create,
            before: None,
            after: Some(after),
        }
    }

    pub fn update(before: Campaign, after: Campaign) -> Self {
        Self {
            op: ChangeOp::Update,
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn delete(before: Campaign) -> Self {
        Self {
            op: ChangeOp::Delete,
            before: Some(before),
            after: None,
        }
    }
}

// ─── Subject actions ────────────────────────────────────────────────────────

/// A behavioural event reported for a subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserEvent {
    pub subject_id: SubjectId,
    pub event_name: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A subject attribute that changed to a new value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAttribute {
    pub subject_id: SubjectId,
    pub attribute_name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// The action that caused an action-based delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum SubjectAction {
    Event(UserEvent),
    Attribute(UserAttribute),
}

impl SubjectAction {
    pub fn subject_id(&self) -> &str {
        match self {
            SubjectAction::Event(event) => &event.subject_id,
            SubjectAction::Attribute(attr) => &attr.subject_id,
        }
    }

    /// Structured properties forwarded with the delivery.
    pub fn properties(&self) -> serde_json::Map<String, serde_json::Value> {
        match self {
            SubjectAction::Event(event) => event.properties.clone(),
            SubjectAction::Attribute(attr) => {
                let mut map = serde_json::Map::new();
                map.insert(attr.attribute_name.clone(), attr.value.clone());
                map
            }
        }
    }
}

// ─── Delivery events ────────────────────────────────────────────────────────

/// Delivery lifecycle event emitted through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub event_id: Uuid,
    pub event_type: DeliveryEventType,
    pub campaign_id: CampaignId,
    pub subject_id: Option<SubjectId>,
    pub channel: Option<String>,
    pub detail: Option<String>,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEventType {
    Scheduled,
    Cancelled,
    Sent,
    Failed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_frequency_is_kept() {
        let freq: Frequency = serde_json::from_str("\"hourly\"").unwrap();
        assert_eq!(freq, Frequency::Unsupported("hourly".into()));

        let freq: Frequency = serde_json::from_str("\"weekly\"").unwrap();
        assert_eq!(freq, Frequency::Weekly);
    }

    #[test]
    fn test_action_based_campaign_from_json() {
        let campaign: Campaign = serde_json::from_value(serde_json::json!({
            "id": "c-1",
            "name": "Cart reminder",
            "status": "active",
            "channel": "stdout",
            "delivery": {
                "delivery_type": "action_based",
                "trigger": {"type": "event", "trigger_event": "cart_abandoned"},
                "delay": {"kind": "calendar", "op": "days", "value": 3, "at_time": "09:00:00"},
                "exception_event": "purchase",
                "start_time": "2024-01-01T00:00:00Z"
            },
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(campaign.kind(), DeliveryKind::ActionBased);
        assert_eq!(campaign.trigger_event(), Some("cart_abandoned"));
        assert_eq!(campaign.exception_event(), Some("purchase"));
        assert_eq!(campaign.trigger_attribute(), None);

        let action = campaign.action_based().unwrap();
        match action.delay.as_ref().unwrap() {
            DelaySpec::Calendar(rule) => {
                assert_eq!(rule.op, CalendarOp::AddDays);
                assert_eq!(rule.value, 3);
            }
            other => panic!("Expected calendar delay, got {:?}", other),
        }
    }

    #[test]
    fn test_change_record_wire_ops() {
        let json = serde_json::json!({"op": "d", "before": null, "after": null});
        let change: CampaignChange = serde_json::from_value(json).unwrap();
        assert_eq!(change.op, ChangeOp::Delete);
    }

    #[test]
    fn test_condition_or_group() {
        let set: FilterSet = serde_json::from_value(serde_json::json!([
            {"name": "amount", "operator": "gte", "condition_value": 100},
            {"or": [
                {"name": "tier", "operator": "eq", "condition_value": "gold"},
                {"name": "tier", "operator": "eq", "condition_value": "silver"}
            ]}
        ]))
        .unwrap();
        assert!(matches!(set[0], Condition::Single(_)));
        assert!(matches!(&set[1], Condition::Any { or } if or.len() == 2));
    }
}
