//! Transport socket abstraction
//! The platform seam: a radio that can enumerate, scan and open RFCOMM
//! sockets, and the socket/stream pair the link session owns.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::types::{DeviceDetails, DeviceIdentity};

/// How a socket reaches the remote serial endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectTarget {
    /// Look up the channel through the device's service record.
    ServiceRecord { uuid: Uuid, secure: bool },
    /// Connect straight to an RFCOMM channel, skipping service discovery.
    Channel(u8),
}

impl std::fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceRecord { uuid, secure: true } => write!(f, "secure service {uuid}"),
            Self::ServiceRecord { uuid, secure: false } => write!(f, "insecure service {uuid}"),
            Self::Channel(channel) => write!(f, "raw channel {channel}"),
        }
    }
}

/// Outbound half of an open socket.
#[async_trait]
pub trait OutputStream: Send + Sync {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    async fn flush(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A single stream connection to one remote device.
#[async_trait]
pub trait TransportSocket: Send + Sync {
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Live status from the underlying socket, not a cached flag.
    async fn is_connected(&self) -> bool;

    /// Hands out the outbound stream. May be called again to replace an
    /// invalidated stream while the socket stays up.
    async fn output_stream(&mut self) -> Result<Box<dyn OutputStream>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Platform radio: enumeration, inquiry and the socket factory.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    async fn is_enabled(&self) -> bool;

    async fn bonded_devices(&self) -> Result<Vec<DeviceIdentity>, TransportError>;

    /// Starts live inquiry. The stream ends when the platform finishes the
    /// inquiry; dropping it stops reading results.
    async fn start_inquiry(&self) -> Result<BoxStream<'static, DeviceIdentity>, TransportError>;

    /// Cancels inquiry. Must be safe when none is running.
    async fn cancel_inquiry(&self);

    /// Creates an unconnected socket for `target`. Backends that cannot
    /// address the target return `TransportError::Unsupported`.
    async fn create_socket(
        &self,
        device: &DeviceIdentity,
        target: ConnectTarget,
    ) -> Result<Box<dyn TransportSocket>, TransportError>;

    async fn device_details(&self, device: &DeviceIdentity) -> Result<DeviceDetails, TransportError>;
}

/// Operations that need platform authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Scan,
    Connect,
}

/// Answers whether the host granted the permissions for an operation.
pub trait Authorizer: Send + Sync {
    fn is_granted(&self, operation: Operation) -> bool;
}

/// Authorizer for hosts without a permission model.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn is_granted(&self, _operation: Operation) -> bool {
        true
    }
}
