//! Messaging dispatch for Campaign Relay.
//!
//! A channel is anything that can deliver a [`DeliveryPayload`] for a
//! subject. The [`ChannelRegistry`] is built once at startup and looked up
//! by channel identifier on every delivery.

pub mod channel;
pub mod noti;
pub mod registry;
pub mod stdout;

pub use channel::{Channel, DeliveryPayload, SendResult};
pub use noti::{NotiChannel, NotiTemplate};
pub use registry::{ChannelRegistry, ChannelRegistryBuilder};
pub use stdout::StdoutChannel;
