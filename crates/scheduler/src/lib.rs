//! Delivery scheduling for Campaign Relay.
//!
//! - [`delay`] resolves delay specifications and recurrence policies
//! - [`job`] defines job keys, triggers and the fire callback
//! - [`scheduler`] owns the job table, the timer task and the worker pool

pub mod delay;
pub mod job;
pub mod scheduler;

pub use delay::{resolve, resolve_delay, resolve_recurrence};
pub use job::{DeliveryHandler, FiredJob, JobKey, JobPayload, JobTrigger};
pub use scheduler::{DeliveryScheduler, ScheduleOutcome};
