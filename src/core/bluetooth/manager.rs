//! Link manager
//! Explicitly constructed owner of the radio, scanner, negotiator and session.
//! The host creates one at start-up and calls `shutdown` when it stops.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::info;
use tokio::sync::{Mutex, watch};
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::link_config::LinkConfig;
use crate::core::bluetooth::connection::{ConnectionNegotiator, NegotiationSettings};
use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::events::{EventHub, EventSink};
use crate::core::bluetooth::scanner::DiscoveryScanner;
use crate::core::bluetooth::session::{LinkSession, SendPolicy};
use crate::core::bluetooth::transport::{Authorizer, RadioAdapter};
use crate::core::bluetooth::types::{
    BondState, Candidate, CandidateSet, ConnectionState, DeviceIdentity, DeviceKind,
};

/// Manages the Bluetooth link to one vehicle at a time.
pub struct LinkManager {
    radio: Arc<dyn RadioAdapter>,
    events: EventHub,
    candidates: Arc<StdMutex<CandidateSet>>,
    scanner: Arc<Mutex<DiscoveryScanner>>,
    negotiator: ConnectionNegotiator,
    session: Arc<LinkSession>,
    connect_task: StdMutex<Option<AbortHandle>>,
}

impl LinkManager {
    /// Creates a new manager. Must be called inside a tokio runtime.
    pub fn new(
        radio: Arc<dyn RadioAdapter>,
        authorizer: Arc<dyn Authorizer>,
        config: &LinkConfig,
    ) -> Self {
        let events = EventHub::new();
        let candidates = Arc::new(StdMutex::new(CandidateSet::new()));

        let scanner = DiscoveryScanner::new(
            radio.clone(),
            authorizer.clone(),
            candidates.clone(),
            events.clone(),
            Duration::from_secs(config.scan_duration_secs),
        );
        let negotiator = ConnectionNegotiator::new(
            radio.clone(),
            authorizer,
            events.clone(),
            NegotiationSettings {
                settle_delay: Duration::from_millis(config.settle_delay_ms),
                attempt_timeout: Duration::from_millis(config.connect_timeout_ms),
                deadline: config.negotiation_deadline_ms.map(Duration::from_millis),
                probe_token: config.probe_token.clone(),
            },
        );
        let session = LinkSession::new(
            events.clone(),
            SendPolicy {
                max_retries: config.send_max_retries,
                retry_delay: Duration::from_millis(config.send_retry_delay_ms),
            },
        );

        Self {
            radio,
            events,
            candidates,
            scanner: Arc::new(Mutex::new(scanner)),
            negotiator,
            session: Arc::new(session),
            connect_task: StdMutex::new(None),
        }
    }

    /// Registers the event sink. The last registration wins.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.events.register(sink);
    }

    pub async fn is_radio_enabled(&self) -> bool {
        self.radio.is_enabled().await
    }

    pub async fn list_bonded_devices(&self) -> HashSet<DeviceIdentity> {
        self.scanner.lock().await.list_bonded_devices().await
    }

    /// Starts live inquiry. Returns false if it could not start.
    pub async fn start_scan(&self) -> bool {
        self.scanner.lock().await.start_scan().await
    }

    pub async fn stop_scan(&self) {
        self.scanner.lock().await.stop_scan().await;
    }

    pub async fn is_scanning(&self) -> bool {
        self.scanner.lock().await.is_scanning()
    }

    /// Bonded devices plus the ones found by the current scan.
    pub fn candidates(&self) -> Vec<Candidate> {
        self.candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .union()
    }

    /// Starts connecting to `device` in the background.
    ///
    /// An attempt still in flight is aborted first, so at most one runs.
    /// Awaiting the handle is optional: the outcome also goes to the sink.
    /// A superseded attempt's handle resolves to a cancelled `JoinError`.
    pub fn connect(&self, device: DeviceIdentity) -> JoinHandle<Result<(), LinkError>> {
        let mut slot = self.connect_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            if !previous.is_finished() {
                info!("Superseding the connection attempt in flight");
                previous.abort();
            }
        }

        let negotiator = self.negotiator.clone();
        let session = self.session.clone();
        let scanner = self.scanner.clone();
        let handle = tokio::spawn(async move {
            negotiator.connect(&device, &session, &scanner).await
        });
        *slot = Some(handle.abort_handle());
        handle
    }

    /// Queues `command` for the connected device. See [`LinkSession::send`].
    pub fn send(&self, command: &str) -> bool {
        self.session.send(command)
    }

    /// Tears the link down in the background.
    pub fn disconnect(&self) -> JoinHandle<()> {
        let session = self.session.clone();
        tokio::spawn(async move { session.disconnect().await })
    }

    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    pub async fn check_connection_health(&self) -> bool {
        self.session.check_connection_health().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.subscribe()
    }

    /// The device currently connected, for hosts that remember the last one.
    pub async fn connected_device(&self) -> Option<DeviceIdentity> {
        self.session.connected_device().await
    }

    /// One-paragraph summary of a device for display.
    pub async fn describe_device(&self, device: &DeviceIdentity) -> String {
        match self.radio.device_details(device).await {
            Ok(details) => {
                let bond = match details.bond_state {
                    BondState::Bonded => "Paired",
                    BondState::Bonding => "Pairing...",
                    BondState::None => "Not Paired",
                    BondState::Unknown => "Unknown",
                };
                let kind = match details.kind {
                    DeviceKind::Classic => "Classic",
                    DeviceKind::LowEnergy => "Low Energy",
                    DeviceKind::Dual => "Dual Mode",
                    DeviceKind::Unknown => "Unknown",
                };
                format!(
                    "Device: {} ({})\nBond State: {}\nType: {}",
                    device.name().unwrap_or("Unknown"),
                    device.address(),
                    bond,
                    kind
                )
            }
            Err(e) => format!("Device info unavailable: {e}"),
        }
    }

    /// Stops scanning, drops the link and forgets the event sink.
    pub async fn shutdown(&self) {
        info!("Shutting down link manager");
        if let Some(task) = self
            .connect_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.stop_scan().await;
        self.session.disconnect().await;
        self.events.clear();
    }
}
