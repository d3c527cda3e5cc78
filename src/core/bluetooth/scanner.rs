//! Device discovery
//! Enumerates bonded devices and runs live inquiry, reporting each device
//! once per scan and a single end-of-scan signal.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::events::EventHub;
use crate::core::bluetooth::transport::{Authorizer, Operation, RadioAdapter};
use crate::core::bluetooth::types::{CandidateSet, DeviceIdentity};

pub struct DiscoveryScanner {
    radio: Arc<dyn RadioAdapter>,
    authorizer: Arc<dyn Authorizer>,
    candidates: Arc<Mutex<CandidateSet>>,
    events: EventHub,
    scan_duration: Duration,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl DiscoveryScanner {
    pub fn new(
        radio: Arc<dyn RadioAdapter>,
        authorizer: Arc<dyn Authorizer>,
        candidates: Arc<Mutex<CandidateSet>>,
        events: EventHub,
        scan_duration: Duration,
    ) -> Self {
        Self {
            radio,
            authorizer,
            candidates,
            events,
            scan_duration,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    /// Returns the devices already paired at the platform level.
    ///
    /// Without authorization an error is reported to the sink and the set is
    /// empty; the platform is not queried.
    pub async fn list_bonded_devices(&self) -> HashSet<DeviceIdentity> {
        if !self.authorizer.is_granted(Operation::Connect) {
            warn!("Listing bonded devices without permission");
            self.events.error(&LinkError::PermissionDenied.to_string());
            return HashSet::new();
        }

        let bonded: HashSet<DeviceIdentity> = match self.radio.bonded_devices().await {
            Ok(devices) => devices.into_iter().collect(),
            Err(e) => {
                error!("Failed to enumerate bonded devices: {}", e);
                self.events.error(&format!("Could not read paired devices: {e}"));
                return HashSet::new();
            }
        };
        info!("Found {} bonded device(s)", bonded.len());

        self.lock_candidates().replace_bonded(bonded.iter().cloned());
        bonded
    }

    /// Starts a live inquiry, cancelling any scan already running.
    ///
    /// Returns false if the scan could not start for lack of authorization.
    pub async fn start_scan(&mut self) -> bool {
        if !self.authorizer.is_granted(Operation::Scan) {
            warn!("Scan requested without permission");
            self.events.error(&LinkError::PermissionDenied.to_string());
            return false;
        }

        if self.scan_task_handle.is_some() {
            self.stop_scan().await;
        }
        self.lock_candidates().clear_discovered();

        self.cancel_token = CancellationToken::new();
        let handle = tokio::spawn(Self::internal_scan_task(
            self.radio.clone(),
            self.candidates.clone(),
            self.events.clone(),
            self.cancel_token.clone(),
            self.scan_duration,
        ));
        self.scan_task_handle = Some(handle);

        info!("Device scan task started.");
        true
    }

    async fn internal_scan_task(
        radio: Arc<dyn RadioAdapter>,
        candidates: Arc<Mutex<CandidateSet>>,
        events: EventHub,
        cancel_token: CancellationToken,
        scan_duration: Duration,
    ) {
        let mut scan_stream = match radio.start_inquiry().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start inquiry: {}", e);
                events.error(&format!("Failed to start discovery: {e}"));
                events.scan_finished();
                return;
            }
        };

        let deadline = tokio::time::sleep(scan_duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(device) => {
                            let is_new = candidates
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .insert_discovered(device.clone());
                            if is_new {
                                debug!("Found device: {}", device);
                                events.device_found(device);
                            }
                        }
                        None => {
                            info!("Inquiry finished by the platform.");
                            break;
                        }
                    }
                }
                _ = &mut deadline => {
                    info!("Scan duration of {:?} elapsed.", scan_duration);
                    break;
                }
                _ = cancel_token.cancelled() => {
                    debug!("Scan cancelled.");
                    break;
                }
            }
        }

        drop(scan_stream);
        radio.cancel_inquiry().await;
        events.scan_finished();
    }

    /// Stops the running scan, if any. Idempotent.
    pub async fn stop_scan(&mut self) {
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            info!("Stopping Bluetooth scan.");
            if let Err(e) = handle.await {
                if e.is_cancelled() {
                    info!("Scan task was cancelled.");
                } else {
                    error!("Scan task finished with an unexpected join error: {:?}", e);
                }
            }
        }

        if self.authorizer.is_granted(Operation::Scan) {
            self.radio.cancel_inquiry().await;
        }
    }

    /// Stops any scan and forgets the devices it found.
    pub async fn reset(&mut self) {
        self.stop_scan().await;
        self.lock_candidates().clear_discovered();
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock_candidates(&self) -> std::sync::MutexGuard<'_, CandidateSet> {
        self.candidates.lock().unwrap_or_else(|e| e.into_inner())
    }
}
