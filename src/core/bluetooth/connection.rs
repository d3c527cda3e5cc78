//! Connection negotiation
//! Turns a device identity into an open socket by trying a fixed sequence of
//! RFCOMM strategies until one answers.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, timeout};

use crate::core::bluetooth::constants::{RAW_RFCOMM_CHANNELS, UUID_SERIAL_PORT_PROFILE};
use crate::core::bluetooth::error::{LinkError, TransportError};
use crate::core::bluetooth::events::EventHub;
use crate::core::bluetooth::scanner::DiscoveryScanner;
use crate::core::bluetooth::session::LinkSession;
use crate::core::bluetooth::transport::{
    Authorizer, ConnectTarget, Operation, OutputStream, RadioAdapter, TransportSocket,
};
use crate::core::bluetooth::types::DeviceIdentity;

/// Timing and probe settings for one negotiation.
#[derive(Debug, Clone)]
pub struct NegotiationSettings {
    /// Pause after cancelling discovery, before the first attempt.
    pub settle_delay: Duration,
    /// Upper bound for a single strategy's connect call.
    pub attempt_timeout: Duration,
    /// Optional bound for the whole strategy sequence. Each attempt gets
    /// whatever is left of it, capped by `attempt_timeout`.
    pub deadline: Option<Duration>,
    /// Sentinel written after connecting. Failure is only logged.
    pub probe_token: Option<String>,
}

/// The strategies in the order they are tried. Never reordered.
pub fn connection_strategies() -> Vec<ConnectTarget> {
    let mut strategies = vec![
        ConnectTarget::ServiceRecord {
            uuid: UUID_SERIAL_PORT_PROFILE,
            secure: true,
        },
        ConnectTarget::ServiceRecord {
            uuid: UUID_SERIAL_PORT_PROFILE,
            secure: false,
        },
    ];
    strategies.extend(RAW_RFCOMM_CHANNELS.iter().map(|&c| ConnectTarget::Channel(c)));
    strategies
}

#[derive(Clone)]
pub struct ConnectionNegotiator {
    radio: Arc<dyn RadioAdapter>,
    authorizer: Arc<dyn Authorizer>,
    events: EventHub,
    settings: NegotiationSettings,
}

impl ConnectionNegotiator {
    pub fn new(
        radio: Arc<dyn RadioAdapter>,
        authorizer: Arc<dyn Authorizer>,
        events: EventHub,
        settings: NegotiationSettings,
    ) -> Self {
        Self {
            radio,
            authorizer,
            events,
            settings,
        }
    }

    /// Runs the full connection sequence for `device`.
    ///
    /// Any existing session is torn down and discovery cancelled before the
    /// first attempt. The outcome is reported to the event sink; the returned
    /// error is for callers that await the attempt.
    pub async fn connect(
        &self,
        device: &DeviceIdentity,
        session: &LinkSession,
        scanner: &Mutex<DiscoveryScanner>,
    ) -> Result<(), LinkError> {
        if !self.authorizer.is_granted(Operation::Connect) {
            warn!("Connect to {} requested without permission", device);
            self.events.error(&LinkError::PermissionDenied.to_string());
            return Err(LinkError::PermissionDenied);
        }

        info!("Connecting to {}", device);
        session.disconnect().await;
        session.mark_connecting();

        // Inquiry slows down connection setup on most stacks.
        scanner.lock().await.reset().await;
        sleep(self.settings.settle_delay).await;

        match self.establish(device).await {
            Ok((socket, stream)) => {
                session.install(device.clone(), socket, stream).await;
                info!("Successfully connected to {}", device.display_name());
                Ok(())
            }
            Err(e) => {
                error!("All connection attempts to {} failed: {}", device, e);
                session.mark_failed();
                self.events.connection_state_changed(false);
                self.events.error(&e.connect_message(device.display_name()));
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        device: &DeviceIdentity,
    ) -> Result<(Box<dyn TransportSocket>, Box<dyn OutputStream>), LinkError> {
        let mut socket = self.open_first(device).await?;

        let mut stream = match socket.output_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Socket connected but output stream unavailable: {}", e);
                if let Err(close_err) = socket.close().await {
                    debug!("{}", LinkError::CloseError(close_err));
                }
                return Err(LinkError::StreamUnavailable);
            }
        };

        if let Some(token) = &self.settings.probe_token {
            match Self::probe(stream.as_mut(), token).await {
                Ok(()) => debug!("Connection test successful"),
                Err(e) => warn!("Connection test failed, but proceeding anyway: {}", e),
            }
        }

        Ok((socket, stream))
    }

    async fn open_first(
        &self,
        device: &DeviceIdentity,
    ) -> Result<Box<dyn TransportSocket>, LinkError> {
        let strategies = connection_strategies();
        let total = strategies.len();
        let deadline = self.settings.deadline.map(|d| (Instant::now() + d, d));
        let mut last_error = None;

        for (index, target) in strategies.into_iter().enumerate() {
            // Attempts share what is left of the deadline; a timed-out socket
            // is still closed in `try_strategy`.
            let budget = match deadline {
                Some((at, total_budget)) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        warn!("Connection deadline of {:?} reached", total_budget);
                        last_error = Some(TransportError::Timeout(total_budget.as_millis() as u64));
                        break;
                    }
                    remaining.min(self.settings.attempt_timeout)
                }
                None => self.settings.attempt_timeout,
            };

            debug!("Trying {} ({}/{})", target, index + 1, total);
            match self.try_strategy(device, target, budget).await {
                Ok(socket) => {
                    info!("Connected to {} via {}", device, target);
                    return Ok(socket);
                }
                Err(e) => {
                    warn!("{} failed: {}", target, e);
                    last_error = Some(e);
                }
            }
        }

        Err(LinkError::ConnectionFailed(last_error.unwrap_or_else(|| {
            TransportError::Platform("All connection strategies failed".to_string())
        })))
    }

    /// One attempt bounded by `attempt_timeout`. A socket that fails is
    /// closed before returning.
    async fn try_strategy(
        &self,
        device: &DeviceIdentity,
        target: ConnectTarget,
        attempt_timeout: Duration,
    ) -> Result<Box<dyn TransportSocket>, TransportError> {
        let mut socket = self.radio.create_socket(device, target).await?;

        let outcome = match timeout(attempt_timeout, socket.connect()).await {
            Ok(Ok(())) => {
                if socket.is_connected().await {
                    Ok(())
                } else {
                    Err(TransportError::NotConnected)
                }
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout(attempt_timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(()) => Ok(socket),
            Err(e) => {
                if let Err(close_err) = socket.close().await {
                    debug!("{}", LinkError::CloseError(close_err));
                }
                Err(e)
            }
        }
    }

    async fn probe(stream: &mut dyn OutputStream, token: &str) -> Result<(), TransportError> {
        stream.write(token.as_bytes()).await?;
        stream.flush().await
    }
}
