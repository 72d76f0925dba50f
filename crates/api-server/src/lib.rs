#![warn(clippy::unwrap_used)]

pub mod grpc;
pub mod ingress;
pub mod rest;
pub mod server;

pub use ingress::EventIngress;
pub use server::ApiServer;
