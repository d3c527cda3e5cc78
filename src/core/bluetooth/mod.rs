//! Bluetooth link for the robot car
//! This module handles discovery of candidate devices, negotiating an RFCOMM
//! connection to one of them and sending commands over it.

#[cfg(all(feature = "bluez", target_os = "linux"))]
mod bluez;
mod connection;
mod constants;
mod error;
mod events;
mod manager;
mod scanner;
mod session;
mod transport;
mod types;

// Re-export types that should be publicly accessible
#[cfg(all(feature = "bluez", target_os = "linux"))]
pub use bluez::BluezRadio;
pub use connection::{ConnectionNegotiator, NegotiationSettings, connection_strategies};
pub use constants::*; // Re-export all constants
pub use error::{FailureCategory, LinkError, TransportError};
pub use events::{ChannelEventSink, EventHub, EventSink, LinkEvent};
pub use manager::LinkManager;
pub use scanner::DiscoveryScanner;
pub use session::{LinkSession, SendPolicy};
pub use transport::{
    AllowAll, Authorizer, ConnectTarget, Operation, OutputStream, RadioAdapter, TransportSocket,
};
pub use types::{
    BondState, Candidate, CandidateSet, ConnectionState, DeviceDetails, DeviceIdentity,
    DeviceKind, extract_mac_address,
};
