//! Link session
//! Owns the single open socket and its outbound stream, and mediates every
//! write to the device.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::core::bluetooth::error::{LinkError, TransportError};
use crate::core::bluetooth::events::EventHub;
use crate::core::bluetooth::transport::{OutputStream, TransportSocket};
use crate::core::bluetooth::types::{ConnectionState, DeviceIdentity};

const UNSTABLE_MESSAGE: &str = "Connection unstable. Please reconnect.";

/// Retry budget for a single command.
#[derive(Debug, Clone, Copy)]
pub struct SendPolicy {
    /// Attempts after the first failed write.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

#[derive(Default)]
struct SessionIo {
    device: Option<DeviceIdentity>,
    socket: Option<Box<dyn TransportSocket>>,
    stream: Option<Box<dyn OutputStream>>,
}

struct SessionShared {
    state: watch::Sender<ConnectionState>,
    io: Mutex<SessionIo>,
    /// Bumped under the `io` lock whenever a connection is installed or torn
    /// down. Queued commands carry the value they were accepted under.
    generation: AtomicU64,
    events: EventHub,
    policy: SendPolicy,
}

/// The long-lived owner of the active connection.
///
/// Commands accepted by [`LinkSession::send`] go through one writer task, so
/// they reach the wire in the order they were accepted.
pub struct LinkSession {
    shared: Arc<SessionShared>,
    queue: mpsc::UnboundedSender<(String, u64)>,
    writer: JoinHandle<()>,
}

impl LinkSession {
    /// Creates a disconnected session. Must be called inside a tokio runtime.
    pub fn new(events: EventHub, policy: SendPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(SessionShared {
            state,
            io: Mutex::new(SessionIo::default()),
            generation: AtomicU64::new(0),
            events,
            policy,
        });

        let (queue, mut commands) = mpsc::unbounded_channel::<(String, u64)>();
        let writer_shared = shared.clone();
        let writer = tokio::spawn(async move {
            while let Some((command, generation)) = commands.recv().await {
                writer_shared.deliver(&command, generation).await;
            }
            debug!("Command queue closed, writer exiting");
        });

        Self {
            shared,
            queue,
            writer,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Accepts a command for sending.
    ///
    /// Returns false without any I/O when the link is not connected. A true
    /// return means the command was queued, not that it was delivered. A
    /// queued command is only ever written to the connection it was accepted
    /// on.
    pub fn send(&self, command: &str) -> bool {
        if self.state() != ConnectionState::Connected {
            self.shared.events.error(&LinkError::NotConnected.to_string());
            return false;
        }

        let generation = self.shared.generation.load(Ordering::SeqCst);
        if self.queue.send((command.to_string(), generation)).is_err() {
            error!("Command writer is gone, dropping {:?}", command);
            return false;
        }
        true
    }

    /// Closes the stream and the socket and reports the link as down.
    ///
    /// Safe to call repeatedly; every call reports `false` to the sink.
    pub async fn disconnect(&self) {
        self.shared.disconnect().await;
    }

    /// True only when the session thinks it is connected and the socket agrees.
    pub async fn is_connected(&self) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        let io = self.shared.io.lock().await;
        match io.socket.as_ref() {
            Some(socket) => socket.is_connected().await,
            None => false,
        }
    }

    /// Socket up and an outbound stream held.
    pub async fn check_connection_health(&self) -> bool {
        let io = self.shared.io.lock().await;
        match io.socket.as_ref() {
            Some(socket) => io.stream.is_some() && socket.is_connected().await,
            None => false,
        }
    }

    pub async fn connected_device(&self) -> Option<DeviceIdentity> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.shared.io.lock().await.device.clone()
    }

    pub(crate) fn mark_connecting(&self) {
        self.shared.state.send_replace(ConnectionState::Connecting);
    }

    pub(crate) fn mark_failed(&self) {
        self.shared.state.send_replace(ConnectionState::Disconnected);
    }

    /// Takes ownership of a freshly negotiated connection.
    pub(crate) async fn install(
        &self,
        device: DeviceIdentity,
        socket: Box<dyn TransportSocket>,
        stream: Box<dyn OutputStream>,
    ) {
        {
            let mut io = self.shared.io.lock().await;
            io.device = Some(device);
            io.socket = Some(socket);
            io.stream = Some(stream);
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.shared.state.send_replace(ConnectionState::Connected);
        self.shared.events.connection_state_changed(true);
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

impl SessionShared {
    /// Connected, and still the connection `generation` was accepted on.
    fn is_current(&self, generation: u64) -> bool {
        *self.state.borrow() == ConnectionState::Connected
            && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn deliver(&self, command: &str, generation: u64) {
        let attempts = self.policy.max_retries + 1;
        let mut last_error = TransportError::NotConnected;

        for attempt in 1..=attempts {
            if !self.is_current(generation) {
                warn!("Dropping command {:?}: link went down", command);
                return;
            }

            match self.write_once(command, generation).await {
                Ok(()) => {
                    debug!("Sent command: {}", command);
                    self.events.data_sent(command);
                    return;
                }
                Err(e) => {
                    warn!("Command send attempt {} failed: {}", attempt, e);
                    last_error = e;
                    if attempt < attempts {
                        sleep(self.policy.retry_delay).await;
                        self.reacquire_stream(generation).await;
                    }
                }
            }
        }

        if !self.is_current(generation) {
            warn!("Dropping command {:?}: link went down", command);
            return;
        }
        let err = LinkError::SendFailed {
            attempts,
            source: last_error,
        };
        error!("All retries failed for command {:?}: {}", command, err);
        self.events.error(UNSTABLE_MESSAGE);
        self.teardown(Some(generation)).await;
    }

    async fn write_once(&self, command: &str, generation: u64) -> Result<(), TransportError> {
        let mut guard = self.io.lock().await;
        let io = &mut *guard;

        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(TransportError::NotConnected);
        }
        let socket = io.socket.as_ref().ok_or(TransportError::NotConnected)?;
        if !socket.is_connected().await {
            return Err(TransportError::NotConnected);
        }
        let stream = io.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write(command.as_bytes()).await?;
        stream.flush().await
    }

    async fn reacquire_stream(&self, generation: u64) {
        let mut guard = self.io.lock().await;
        let io = &mut *guard;

        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let Some(socket) = io.socket.as_mut() else {
            return;
        };
        if !socket.is_connected().await {
            return;
        }
        match socket.output_stream().await {
            Ok(stream) => {
                debug!("Re-acquired output stream");
                io.stream = Some(stream);
            }
            Err(e) => warn!("Failed to re-establish output stream: {}", e),
        }
    }

    async fn disconnect(&self) {
        self.teardown(None).await;
    }

    /// Closes the current connection. With `only` set, does nothing unless
    /// that generation is still the current one.
    async fn teardown(&self, only: Option<u64>) {
        let (stream, socket) = {
            let mut io = self.io.lock().await;
            if only.is_some_and(|generation| generation != self.generation.load(Ordering::SeqCst)) {
                debug!("Connection already replaced, skipping teardown");
                return;
            }
            io.device = None;
            self.generation.fetch_add(1, Ordering::SeqCst);
            (io.stream.take(), io.socket.take())
        };

        if let Some(mut stream) = stream {
            if let Err(e) = stream.close().await {
                warn!("{}", LinkError::CloseError(e));
            }
        }
        if let Some(mut socket) = socket {
            if let Err(e) = socket.close().await {
                warn!("{}", LinkError::CloseError(e));
            }
            info!("Socket closed");
        }

        self.state.send_replace(ConnectionState::Disconnected);
        self.events.connection_state_changed(false);
    }
}
