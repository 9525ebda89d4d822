//! Legal AI dashboard core.
//!
//! Data flow: kernel events arrive through the [`channel::ChannelClient`],
//! [`bindings`] turn them into [`store::Store`] actions, views read the store
//! through [`selectors`].

pub mod bindings;
pub mod channel;
pub mod config;
pub mod prefs;
pub mod selectors;
pub mod store;
pub mod transport;

pub use channel::{ChannelClient, ChannelConfig, ChannelError, ConnectionState, Network, Visibility};
pub use store::{DashboardState, NotificationKind, Store};
pub use transport::{MqttTransport, Transport};
