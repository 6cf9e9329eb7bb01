//! Real-time channel: typed events and the session connector
//!
//! The channel is a best-effort notification layer over the backend, never
//! a substitute for it. Durable mutations always go through the REST
//! client; the channel only propagates what already happened.

pub mod connector;
pub mod events;

pub use connector::{ChannelNotice, ConnectorConfig, LinkStatus, ReconnectPolicy, SessionConnector};
pub use events::{ClientEvent, ServerEvent};
