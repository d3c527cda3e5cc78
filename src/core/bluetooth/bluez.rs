//! BlueZ backend
//! Implements the radio and socket traits on Linux through `bluer`.
//! Service-record strategies go through a registered serial profile; raw
//! channel strategies open an RFCOMM socket directly.

use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use async_trait::async_trait;
use bluer::rfcomm::{
    Profile, ProfileHandle, Role, Security, SecurityLevel, Socket, SocketAddr, Stream,
};
use bluer::{Adapter, AdapterEvent, Address, AddressType, DiscoveryFilter, DiscoveryTransport, Session};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::transport::{
    ConnectTarget, OutputStream, RadioAdapter, TransportSocket,
};
use crate::core::bluetooth::types::{BondState, DeviceDetails, DeviceIdentity, DeviceKind};

fn platform(e: bluer::Error) -> TransportError {
    TransportError::Platform(e.to_string())
}

fn parse_address(device: &DeviceIdentity) -> Result<Address, TransportError> {
    device
        .address()
        .parse::<Address>()
        .map_err(|e| TransportError::Platform(format!("invalid address {}: {}", device.address(), e)))
}

/// BlueZ adapter handle.
pub struct BluezRadio {
    session: Session,
    adapter: Adapter,
}

impl BluezRadio {
    /// Opens the named adapter, or the default one.
    pub async fn new(adapter_name: Option<&str>) -> Result<Self> {
        let session = Session::new().await?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter {}", adapter.name());
        Ok(Self { session, adapter })
    }
}

#[async_trait]
impl RadioAdapter for BluezRadio {
    async fn is_enabled(&self) -> bool {
        self.adapter.is_powered().await.unwrap_or(false)
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceIdentity>, TransportError> {
        let mut bonded = Vec::new();
        for addr in self.adapter.device_addresses().await.map_err(platform)? {
            let Ok(device) = self.adapter.device(addr) else {
                continue;
            };
            if device.is_paired().await.unwrap_or(false) {
                let name = device.name().await.ok().flatten();
                bonded.push(DeviceIdentity::new(addr.to_string(), name));
            }
        }
        Ok(bonded)
    }

    async fn start_inquiry(&self) -> Result<BoxStream<'static, DeviceIdentity>, TransportError> {
        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::BrEdr,
            ..Default::default()
        };
        self.adapter
            .set_discovery_filter(filter)
            .await
            .map_err(platform)?;

        let events = self.adapter.discover_devices().await.map_err(platform)?;
        let adapter = self.adapter.clone();
        let devices = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    AdapterEvent::DeviceAdded(addr) => {
                        let name = match adapter.device(addr) {
                            Ok(device) => device.name().await.ok().flatten(),
                            Err(_) => None,
                        };
                        Some(DeviceIdentity::new(addr.to_string(), name))
                    }
                    _ => None,
                }
            }
        });
        Ok(devices.boxed())
    }

    async fn cancel_inquiry(&self) {
        // Discovery is tied to the event stream and stops when it is dropped.
        debug!("Inquiry cancel requested");
    }

    async fn create_socket(
        &self,
        device: &DeviceIdentity,
        target: ConnectTarget,
    ) -> Result<Box<dyn TransportSocket>, TransportError> {
        let address = parse_address(device)?;
        Ok(Box::new(BluezSocket {
            session: self.session.clone(),
            adapter: self.adapter.clone(),
            address,
            target,
            stream: None,
            profile: StdMutex::new(None),
        }))
    }

    async fn device_details(&self, device: &DeviceIdentity) -> Result<DeviceDetails, TransportError> {
        let address = parse_address(device)?;
        let handle = self.adapter.device(address).map_err(platform)?;

        let bond_state = match handle.is_paired().await {
            Ok(true) => BondState::Bonded,
            Ok(false) => BondState::None,
            Err(_) => BondState::Unknown,
        };
        let kind = match handle.address_type().await {
            Ok(AddressType::BrEdr) => DeviceKind::Classic,
            Ok(AddressType::LePublic | AddressType::LeRandom) => DeviceKind::LowEnergy,
            #[allow(unreachable_patterns)]
            Ok(_) | Err(_) => DeviceKind::Unknown,
        };
        Ok(DeviceDetails { bond_state, kind })
    }
}

/// Liveness of an RFCOMM channel from its peer address lookup. A dead
/// channel reports ENOTCONN even while the ACL link to the device is up.
fn channel_alive(peer: std::io::Result<SocketAddr>, expected: Address) -> bool {
    match peer {
        Ok(peer) => peer.addr == expected,
        Err(e) => {
            debug!("RFCOMM channel to {} is down: {}", expected, e);
            false
        }
    }
}

/// One RFCOMM connection attempt and, once connected, the open link.
struct BluezSocket {
    session: Session,
    adapter: Adapter,
    address: Address,
    target: ConnectTarget,
    stream: Option<Arc<Mutex<Stream>>>,
    profile: StdMutex<Option<ProfileHandle>>,
}

impl BluezSocket {
    async fn connect_channel(&self, channel: u8) -> Result<Stream, TransportError> {
        let socket = Socket::new()?;
        socket.set_security(Security {
            level: SecurityLevel::Low,
            key_size: 0,
        })?;
        Ok(socket.connect(SocketAddr::new(self.address, channel)).await?)
    }

    async fn connect_service(&self, uuid: uuid::Uuid, secure: bool) -> Result<Stream, TransportError> {
        let profile = Profile {
            uuid,
            name: Some("robocar-link serial client".to_string()),
            role: Some(Role::Client),
            require_authentication: Some(secure),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = self.session.register_profile(profile).await.map_err(platform)?;

        let device = self.adapter.device(self.address).map_err(platform)?;
        let mut connect_task = tokio::spawn(async move { device.connect_profile(&uuid).await });

        let request = tokio::select! {
            request = handle.next() => request.ok_or_else(|| {
                TransportError::Platform("Service discovery failed: profile closed".to_string())
            })?,
            joined = &mut connect_task => {
                let reason = match joined {
                    Ok(Ok(())) => "Service discovery failed: no serial channel offered".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                return Err(TransportError::Platform(reason));
            }
        };
        let stream = request.accept().map_err(platform)?;

        *self.profile.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(stream)
    }
}

#[async_trait]
impl TransportSocket for BluezSocket {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let stream = match self.target {
            ConnectTarget::Channel(channel) => self.connect_channel(channel).await?,
            ConnectTarget::ServiceRecord { uuid, secure } => {
                self.connect_service(uuid, secure).await?
            }
        };
        self.stream = Some(Arc::new(Mutex::new(stream)));
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        let Some(stream) = &self.stream else {
            return false;
        };
        channel_alive(stream.lock().await.peer_addr(), self.address)
    }

    async fn output_stream(&mut self) -> Result<Box<dyn OutputStream>, TransportError> {
        let stream = self.stream.clone().ok_or(TransportError::NotConnected)?;
        Ok(Box::new(BluezOutput { stream }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.profile.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.lock().await.shutdown().await {
                warn!("RFCOMM shutdown to {} failed: {}", self.address, e);
                return Err(e.into());
            }
        }
        Ok(())
    }
}

struct BluezOutput {
    stream: Arc<Mutex<Stream>>,
}

#[async_trait]
impl OutputStream for BluezOutput {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        Ok(self.stream.lock().await.write_all(bytes).await?)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(self.stream.lock().await.flush().await?)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // The socket owns the stream; closing it shuts the link down.
        Ok(())
    }
}
