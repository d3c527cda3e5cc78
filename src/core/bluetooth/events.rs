//! Event delivery to the presentation layer
//! All asynchronous outcomes of the link layer are reported through a single
//! registered `EventSink`.

use std::sync::{Arc, RwLock};

use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::bluetooth::types::DeviceIdentity;

/// Observer for link layer outcomes.
pub trait EventSink: Send + Sync {
    fn on_device_found(&self, device: DeviceIdentity);

    fn on_scan_finished(&self);

    fn on_connection_state_changed(&self, connected: bool);

    fn on_data_sent(&self, command: &str);

    fn on_error(&self, message: &str);
}

/// Owned form of the sink callbacks, for channel delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum LinkEvent {
    DeviceFound(DeviceIdentity),
    ScanFinished,
    ConnectionStateChanged(bool),
    DataSent(String),
    Error(String),
}

/// Forwards events into a channel so the UI can drain them on its own thread.
#[derive(Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<LinkEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn emit(&self, event: LinkEvent) {
        if self.sender.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }
}

impl EventSink for ChannelEventSink {
    fn on_device_found(&self, device: DeviceIdentity) {
        self.emit(LinkEvent::DeviceFound(device));
    }

    fn on_scan_finished(&self) {
        self.emit(LinkEvent::ScanFinished);
    }

    fn on_connection_state_changed(&self, connected: bool) {
        self.emit(LinkEvent::ConnectionStateChanged(connected));
    }

    fn on_data_sent(&self, command: &str) {
        self.emit(LinkEvent::DataSent(command.to_string()));
    }

    fn on_error(&self, message: &str) {
        self.emit(LinkEvent::Error(message.to_string()));
    }
}

/// Single-subscriber registration point shared by every component.
///
/// The last registration wins: registering a new sink replaces the previous
/// one, which stops receiving events. Without a sink, events are dropped.
#[derive(Clone, Default)]
pub struct EventHub {
    sink: Arc<RwLock<Option<Arc<dyn EventSink>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn EventSink>) {
        let mut guard = self.sink.write().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            warn!("Replacing registered event sink; the previous subscriber stops receiving events");
        }
        *guard = Some(sink);
    }

    pub fn clear(&self) {
        let mut guard = self.sink.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn is_registered(&self) -> bool {
        self.sink
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn current(&self) -> Option<Arc<dyn EventSink>> {
        self.sink
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn device_found(&self, device: DeviceIdentity) {
        if let Some(sink) = self.current() {
            sink.on_device_found(device);
        }
    }

    pub fn scan_finished(&self) {
        if let Some(sink) = self.current() {
            sink.on_scan_finished();
        }
    }

    pub fn connection_state_changed(&self, connected: bool) {
        if let Some(sink) = self.current() {
            sink.on_connection_state_changed(connected);
        }
    }

    pub fn data_sent(&self, command: &str) {
        if let Some(sink) = self.current() {
            sink.on_data_sent(command);
        }
    }

    pub fn error(&self, message: &str) {
        if let Some(sink) = self.current() {
            sink.on_error(message);
        }
    }
}
