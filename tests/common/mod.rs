//! Scripted radio used by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use robocar_link_lib::core::bluetooth::{
    Authorizer, BondState, ConnectTarget, DeviceDetails, DeviceIdentity, DeviceKind, LinkEvent,
    Operation, OutputStream, RadioAdapter, TransportError, TransportSocket,
};
use robocar_link_lib::LinkConfig;
use tokio::sync::mpsc::UnboundedReceiver;

/// Shared record of everything the radio was asked to do.
#[derive(Default)]
pub struct RadioLog {
    pub attempts: Mutex<Vec<ConnectTarget>>,
    pub written: Mutex<Vec<String>>,
    pub open_sockets: AtomicUsize,
    pub max_open_sockets: AtomicUsize,
    pub closed_sockets: AtomicUsize,
    pub stream_requests: AtomicUsize,
    pub write_calls: AtomicUsize,
    pub inquiry_starts: AtomicUsize,
    pub inquiry_cancels: AtomicUsize,
}

impl RadioLog {
    pub fn attempts(&self) -> Vec<ConnectTarget> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }
}

pub struct MockRadio {
    pub log: Arc<RadioLog>,
    pub bonded: Vec<DeviceIdentity>,
    pub inquiry: Vec<DeviceIdentity>,
    /// When false the inquiry stream never ends on its own.
    pub inquiry_ends: bool,
    pub succeed_on: HashSet<ConnectTarget>,
    pub connect_error: String,
    /// Connect returns Ok but the socket reports itself down.
    pub silent_failures: HashSet<ConnectTarget>,
    pub stream_unavailable: bool,
    /// Connect never completes.
    pub hang_on_connect: bool,
    /// Number of upcoming writes that fail.
    pub fail_writes: Arc<AtomicUsize>,
    /// Live status reported by connected sockets.
    pub socket_alive: Arc<AtomicBool>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self {
            log: Arc::new(RadioLog::default()),
            bonded: Vec::new(),
            inquiry: Vec::new(),
            inquiry_ends: true,
            succeed_on: HashSet::new(),
            connect_error: "read failed, socket might closed or timeout, read ret: -1".to_string(),
            silent_failures: HashSet::new(),
            stream_unavailable: false,
            hang_on_connect: false,
            fail_writes: Arc::new(AtomicUsize::new(0)),
            socket_alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn succeeding_on(mut self, target: ConnectTarget) -> Self {
        self.succeed_on.insert(target);
        self
    }
}

#[async_trait]
impl RadioAdapter for MockRadio {
    async fn is_enabled(&self) -> bool {
        true
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceIdentity>, TransportError> {
        Ok(self.bonded.clone())
    }

    async fn start_inquiry(&self) -> Result<BoxStream<'static, DeviceIdentity>, TransportError> {
        self.log.inquiry_starts.fetch_add(1, Ordering::SeqCst);
        let found = stream::iter(self.inquiry.clone());
        if self.inquiry_ends {
            Ok(found.boxed())
        } else {
            Ok(found.chain(stream::pending()).boxed())
        }
    }

    async fn cancel_inquiry(&self) {
        self.log.inquiry_cancels.fetch_add(1, Ordering::SeqCst);
    }

    async fn create_socket(
        &self,
        _device: &DeviceIdentity,
        target: ConnectTarget,
    ) -> Result<Box<dyn TransportSocket>, TransportError> {
        let open = self.log.open_sockets.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_open_sockets.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MockSocket {
            log: self.log.clone(),
            target,
            succeeds: self.succeed_on.contains(&target),
            silent_failure: self.silent_failures.contains(&target),
            connect_error: self.connect_error.clone(),
            stream_unavailable: self.stream_unavailable,
            hang: self.hang_on_connect,
            fail_writes: self.fail_writes.clone(),
            alive: self.socket_alive.clone(),
            connected: false,
            closed: false,
        }))
    }

    async fn device_details(&self, device: &DeviceIdentity) -> Result<DeviceDetails, TransportError> {
        let bonded = self.bonded.contains(device);
        Ok(DeviceDetails {
            bond_state: if bonded { BondState::Bonded } else { BondState::None },
            kind: DeviceKind::Classic,
        })
    }
}

struct MockSocket {
    log: Arc<RadioLog>,
    target: ConnectTarget,
    succeeds: bool,
    silent_failure: bool,
    connect_error: String,
    stream_unavailable: bool,
    hang: bool,
    fail_writes: Arc<AtomicUsize>,
    alive: Arc<AtomicBool>,
    connected: bool,
    closed: bool,
}

#[async_trait]
impl TransportSocket for MockSocket {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.log.attempts.lock().unwrap().push(self.target);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.silent_failure {
            return Ok(());
        }
        if self.succeeds {
            self.connected = true;
            Ok(())
        } else {
            Err(TransportError::Platform(self.connect_error.clone()))
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected && !self.closed && self.alive.load(Ordering::SeqCst)
    }

    async fn output_stream(&mut self) -> Result<Box<dyn OutputStream>, TransportError> {
        self.log.stream_requests.fetch_add(1, Ordering::SeqCst);
        if self.stream_unavailable || !self.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(Box::new(MockStream {
            log: self.log.clone(),
            fail_writes: self.fail_writes.clone(),
        }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.log.open_sockets.fetch_sub(1, Ordering::SeqCst);
            self.log.closed_sockets.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MockStream {
    log: Arc<RadioLog>,
    fail_writes: Arc<AtomicUsize>,
}

#[async_trait]
impl OutputStream for MockStream {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.log.write_calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Broken pipe").into());
        }
        self.log
            .written
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(bytes).into_owned());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "close on dead stream").into())
    }
}

/// Grants everything except the listed operations.
pub struct Deny(pub Vec<Operation>);

impl Authorizer for Deny {
    fn is_granted(&self, operation: Operation) -> bool {
        !self.0.contains(&operation)
    }
}

/// Config with the waits shortened for tests.
pub fn fast_config() -> LinkConfig {
    LinkConfig {
        settle_delay_ms: 0,
        connect_timeout_ms: 1_000,
        send_retry_delay_ms: 10,
        scan_duration_secs: 5,
        ..LinkConfig::default()
    }
}

/// Waits for the next event or panics after two seconds.
pub async fn next_event(rx: &mut UnboundedReceiver<LinkEvent>) -> LinkEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Collects events until `stop` matches (inclusive).
pub async fn events_until(
    rx: &mut UnboundedReceiver<LinkEvent>,
    stop: impl Fn(&LinkEvent) -> bool,
) -> Vec<LinkEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Everything already queued on the channel.
pub fn drain(rx: &mut UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}

pub fn count(events: &[LinkEvent], wanted: &LinkEvent) -> usize {
    events.iter().filter(|e| *e == wanted).count()
}

pub fn errors(events: &[LinkEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            LinkEvent::Error(message) => Some(message.clone()),
            _ => None,
        })
        .collect()
}

pub fn secure() -> ConnectTarget {
    ConnectTarget::ServiceRecord {
        uuid: robocar_link_lib::core::bluetooth::UUID_SERIAL_PORT_PROFILE,
        secure: true,
    }
}

pub fn insecure() -> ConnectTarget {
    ConnectTarget::ServiceRecord {
        uuid: robocar_link_lib::core::bluetooth::UUID_SERIAL_PORT_PROFILE,
        secure: false,
    }
}

/// Manager over `radio` with a channel sink registered.
pub fn setup_with(
    radio: MockRadio,
    authorizer: Arc<dyn Authorizer>,
    config: &LinkConfig,
) -> (
    robocar_link_lib::LinkManager,
    Arc<RadioLog>,
    UnboundedReceiver<LinkEvent>,
) {
    let log = radio.log.clone();
    let manager = robocar_link_lib::LinkManager::new(Arc::new(radio), authorizer, config);
    let (sink, rx) = robocar_link_lib::ChannelEventSink::new();
    manager.set_event_sink(Arc::new(sink));
    (manager, log, rx)
}

pub fn setup(
    radio: MockRadio,
) -> (
    robocar_link_lib::LinkManager,
    Arc<RadioLog>,
    UnboundedReceiver<LinkEvent>,
) {
    setup_with(
        radio,
        Arc::new(robocar_link_lib::core::bluetooth::AllowAll),
        &fast_config(),
    )
}
