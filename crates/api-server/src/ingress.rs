//! Inbound notification entry point shared by the REST and gRPC surfaces.
//!
//! In direct mode user events go straight to the orchestrator, which queries
//! the campaign store. In stream mode they are published into the routing
//! pipeline and reach the orchestrator as routed records. Attribute changes
//! always take the direct path.

use std::sync::Arc;

use campaign_core::config::RoutingMode;
use campaign_core::types::{Campaign, CampaignStatus, UserAttribute, UserEvent};
use campaign_core::CampaignResult;
use campaign_orchestrator::CampaignOrchestrator;
use campaign_routing::RoutingHandle;
use tracing::debug;

/// Maximum length of subject IDs and event / attribute names.
const MAX_FIELD_LEN: usize = 256;

pub struct EventIngress {
    orchestrator: Arc<CampaignOrchestrator>,
    routing: Option<RoutingHandle>,
}

impl EventIngress {
    pub fn direct(orchestrator: Arc<CampaignOrchestrator>) -> Self {
        Self {
            orchestrator,
            routing: None,
        }
    }

    pub fn streaming(orchestrator: Arc<CampaignOrchestrator>, routing: RoutingHandle) -> Self {
        Self {
            orchestrator,
            routing: Some(routing),
        }
    }

    pub fn mode(&self) -> RoutingMode {
        match self.routing {
            Some(_) => RoutingMode::Stream,
            None => RoutingMode::Direct,
        }
    }

    pub fn notify_user_event(&self, event: UserEvent) -> CampaignResult<()> {
        match &self.routing {
            Some(routing) => {
                debug!(event_name = %event.event_name, subject_id = %event.subject_id, "Publishing user event");
                routing.publish_event(event)
            }
            None => self.orchestrator.handle_user_event(&event).map(|_| ()),
        }
    }

    pub fn notify_user_attribute(&self, attribute: UserAttribute) -> CampaignResult<()> {
        self.orchestrator.handle_user_attribute(&attribute).map(|_| ())
    }

    pub fn activate(&self, campaign_id: &str) -> CampaignResult<Campaign> {
        self.orchestrator.activate(campaign_id)
    }

    pub fn deactivate(&self, campaign_id: &str, status: CampaignStatus) -> CampaignResult<Campaign> {
        self.orchestrator.deactivate(campaign_id, status)
    }
}

/// Validate a user event at the API boundary.
pub fn validate_user_event(event: &UserEvent) -> Result<(), &'static str> {
    validate_subject(&event.subject_id)?;
    if event.event_name.is_empty() {
        return Err("'event_name' must not be empty");
    }
    if event.event_name.len() > MAX_FIELD_LEN {
        return Err("'event_name' exceeds maximum length");
    }
    Ok(())
}

/// Validate an attribute change at the API boundary.
pub fn validate_user_attribute(attribute: &UserAttribute) -> Result<(), &'static str> {
    validate_subject(&attribute.subject_id)?;
    if attribute.attribute_name.is_empty() {
        return Err("'attribute_name' must not be empty");
    }
    if attribute.attribute_name.len() > MAX_FIELD_LEN {
        return Err("'attribute_name' exceeds maximum length");
    }
    Ok(())
}

fn validate_subject(subject_id: &str) -> Result<(), &'static str> {
    if subject_id.is_empty() {
        return Err("'subject_id' must not be empty");
    }
    if subject_id.len() > MAX_FIELD_LEN {
        return Err("'subject_id' exceeds maximum length");
    }
    Ok(())
}
