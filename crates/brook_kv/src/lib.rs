//! Upstream CDC client interface, and an in-process channel-backed client
//! for tests and embedded deployments.

pub mod channel;
pub mod client;

pub use channel::{ChannelCdcClient, ChannelConnector};
pub use client::{CdcClient, CdcConnector, EventSink};
