//! Robot car link library
//! Classic Bluetooth (RFCOMM) discovery, connection negotiation and command
//! transport for serial-driven vehicles.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

pub use crate::config::{AppConfig, LinkConfig};
pub use crate::core::bluetooth::{
    ChannelEventSink, ConnectionState, DeviceIdentity, EventSink, LinkError, LinkEvent,
};
pub use crate::core::LinkManager;
