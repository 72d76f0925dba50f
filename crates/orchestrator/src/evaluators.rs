//! Qualification evaluators.
//!
//! Each evaluator answers one question about a (campaign, subject) pair.
//! A subject that does not qualify is a normal outcome (`Ok(false)`), not an
//! error; errors mean the question could not be answered.

use std::collections::HashSet;
use std::sync::Arc;

use campaign_core::types::{Campaign, SubjectAction, TriggerAction, UserAttribute};
use campaign_core::CampaignResult;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::filter::matches_all;

/// The subject being qualified, and the action that brought them here if any.
#[derive(Debug, Clone, Copy)]
pub struct SubjectContext<'a> {
    pub subject_id: &'a str,
    pub action: Option<&'a SubjectAction>,
}

impl<'a> SubjectContext<'a> {
    pub fn from_action(action: &'a SubjectAction) -> Self {
        Self {
            subject_id: action.subject_id(),
            action: Some(action),
        }
    }
}

pub trait QualificationEvaluator: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, campaign: &Campaign, subject: &SubjectContext<'_>) -> CampaignResult<bool>;
}

/// Checks the triggering event's properties against the campaign's
/// property filters. Passes when no filter is configured.
#[derive(Debug, Default)]
pub struct EventPropertyEvaluator;

impl QualificationEvaluator for EventPropertyEvaluator {
    fn name(&self) -> &str {
        "event_property"
    }

    fn evaluate(&self, campaign: &Campaign, subject: &SubjectContext<'_>) -> CampaignResult<bool> {
        let Some(action_based) = campaign.action_based() else {
            return Ok(true);
        };
        let TriggerAction::Event {
            property_filters: Some(filters),
            ..
        } = &action_based.trigger
        else {
            return Ok(true);
        };
        match subject.action {
            Some(SubjectAction::Event(event)) => Ok(matches_all(filters, &event.properties)),
            _ => Ok(true),
        }
    }
}

/// Where segment membership and subject attributes come from.
pub trait SegmentDirectory: Send + Sync {
    fn is_member(&self, segment_id: &str, subject_id: &str) -> CampaignResult<bool>;

    /// Latest known attributes of the subject.
    fn attributes(&self, subject_id: &str) -> CampaignResult<Map<String, Value>>;

    /// Remember an attribute change. Directories without local state ignore it.
    fn record_attribute(&self, _attribute: &UserAttribute) {}
}

/// Requires membership in every target segment, then checks the
/// campaign's additional filters against the subject's attributes.
pub struct AudienceEvaluator {
    directory: Arc<dyn SegmentDirectory>,
}

impl AudienceEvaluator {
    pub fn new(directory: Arc<dyn SegmentDirectory>) -> Self {
        Self { directory }
    }
}

impl QualificationEvaluator for AudienceEvaluator {
    fn name(&self) -> &str {
        "audience"
    }

    fn evaluate(&self, campaign: &Campaign, subject: &SubjectContext<'_>) -> CampaignResult<bool> {
        for segment_id in &campaign.target.target_segment_ids {
            if !self.directory.is_member(segment_id, subject.subject_id)? {
                debug!(
                    campaign_id = %campaign.id,
                    subject_id = %subject.subject_id,
                    segment_id = %segment_id,
                    "Subject not in target segment"
                );
                return Ok(false);
            }
        }

        match &campaign.target.additional_filters {
            Some(filters) if !filters.is_empty() => {
                let attributes = self.directory.attributes(subject.subject_id)?;
                Ok(matches_all(filters, &attributes))
            }
            _ => Ok(true),
        }
    }
}

/// Segment directory held in memory. Attributes are the latest value seen
/// per attribute name.
#[derive(Default)]
pub struct InMemorySegmentDirectory {
    members: DashMap<String, HashSet<String>>,
    attributes: DashMap<String, Map<String, Value>>,
}

impl InMemorySegmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, segment_id: &str, subject_id: &str) {
        self.members
            .entry(segment_id.to_string())
            .or_default()
            .insert(subject_id.to_string());
    }

    pub fn remove_member(&self, segment_id: &str, subject_id: &str) {
        if let Some(mut members) = self.members.get_mut(segment_id) {
            members.remove(subject_id);
        }
    }
}

impl SegmentDirectory for InMemorySegmentDirectory {
    fn is_member(&self, segment_id: &str, subject_id: &str) -> CampaignResult<bool> {
        Ok(self
            .members
            .get(segment_id)
            .map_or(false, |members| members.contains(subject_id)))
    }

    fn attributes(&self, subject_id: &str) -> CampaignResult<Map<String, Value>> {
        Ok(self
            .attributes
            .get(subject_id)
            .map(|attrs| attrs.value().clone())
            .unwrap_or_default())
    }

    fn record_attribute(&self, attribute: &UserAttribute) {
        self.attributes
            .entry(attribute.subject_id.clone())
            .or_default()
            .insert(attribute.attribute_name.clone(), attribute.value.clone());
    }
}

/// Conjunction of evaluators, checked in order, stopping at the first "no".
#[derive(Clone, Default)]
pub struct Qualification {
    evaluators: Vec<Arc<dyn QualificationEvaluator>>,
}

impl Qualification {
    pub fn new(evaluators: Vec<Arc<dyn QualificationEvaluator>>) -> Self {
        Self { evaluators }
    }

    /// Property filters, then audience.
    pub fn standard(directory: Arc<dyn SegmentDirectory>) -> Self {
        Self::new(vec![
            Arc::new(EventPropertyEvaluator),
            Arc::new(AudienceEvaluator::new(directory)),
        ])
    }

    pub fn evaluate(&self, campaign: &Campaign, subject: &SubjectContext<'_>) -> CampaignResult<bool> {
        for evaluator in &self.evaluators {
            if !evaluator.evaluate(campaign, subject)? {
                debug!(
                    campaign_id = %campaign.id,
                    subject_id = %subject.subject_id,
                    evaluator = evaluator.name(),
                    "Subject did not qualify"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn evaluators(&self) -> &[Arc<dyn QualificationEvaluator>] {
        &self.evaluators
    }
}
