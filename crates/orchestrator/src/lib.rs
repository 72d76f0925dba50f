//! Campaign orchestration for Campaign Relay.
//!
//! Coordinates the campaign store, qualification evaluators, the delivery
//! scheduler and the channel registry:
//!
//! - [`store`] is the campaign store collaborator and its change feed
//! - [`filter`] evaluates property filters against JSON properties
//! - [`evaluators`] holds the pluggable qualification checks
//! - [`delivery`] runs fired jobs through qualification and dispatch
//! - [`orchestrator`] handles user events, attribute changes and lifecycle calls
//! - [`sink`] consumes routed records from the streaming pipeline

pub mod delivery;
pub mod evaluators;
pub mod filter;
pub mod orchestrator;
pub mod sink;
pub mod store;

pub use delivery::DeliveryExecutor;
pub use evaluators::{
    AudienceEvaluator, EventPropertyEvaluator, InMemorySegmentDirectory, Qualification,
    QualificationEvaluator, SegmentDirectory, SubjectContext,
};
pub use orchestrator::{CampaignOrchestrator, HandleSummary};
pub use sink::spawn_routed_sink;
pub use store::{CampaignQuery, CampaignStore, InMemoryCampaignStore};
