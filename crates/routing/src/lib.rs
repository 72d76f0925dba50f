//! Event routing for Campaign Relay.
//!
//! Keeps an incrementally maintained index of which live campaigns care about
//! which event names, and joins that index against the user-event stream.
//!
//! - [`index`] derives interest deltas from campaign change records
//! - [`router`] turns a user event plus the current interest into routed records
//! - [`pipeline`] runs both as event-name partitioned tasks
//! - [`nats`] feeds change records and user events in from NATS subjects

pub mod index;
pub mod nats;
pub mod pipeline;
pub mod router;

pub use index::{derive_deltas, CampaignIndex, Interest, InterestDelta, InterestKind};
pub use pipeline::{spawn_change_feed, spawn_pipeline, RoutingHandle};
pub use router::{EventRouter, RoutedRecord};
